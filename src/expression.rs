use serde::{Deserialize, Serialize};

/// Per-frame approach rate toward the target weight.
const BLEND_RATE: f32 = 0.08;
const SETTLE_EPSILON: f32 = 0.01;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    #[default]
    Neutral,
    Happy,
    Angry,
    Sad,
    Relaxed,
    Surprised,
}

impl Emotion {
    pub const ALL: [Emotion; 6] =
        [Emotion::Neutral, Emotion::Happy, Emotion::Angry, Emotion::Sad, Emotion::Relaxed, Emotion::Surprised];

    /// Unknown names fall back to neutral.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "happy" => Emotion::Happy,
            "angry" => Emotion::Angry,
            "sad" => Emotion::Sad,
            "relaxed" => Emotion::Relaxed,
            "surprised" => Emotion::Surprised,
            _ => Emotion::Neutral,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Emotion::Neutral => "neutral",
            Emotion::Happy => "happy",
            Emotion::Angry => "angry",
            Emotion::Sad => "sad",
            Emotion::Relaxed => "relaxed",
            Emotion::Surprised => "surprised",
        }
    }

    fn index(self) -> usize {
        match self {
            Emotion::Neutral => 0,
            Emotion::Happy => 1,
            Emotion::Angry => 2,
            Emotion::Sad => 3,
            Emotion::Relaxed => 4,
            Emotion::Surprised => 5,
        }
    }

    /// Weight the expression reaches at full strength.
    pub fn peak_weight(self) -> f32 {
        match self {
            Emotion::Neutral => 0.0,
            Emotion::Happy => 0.6,
            Emotion::Angry => 0.65,
            Emotion::Sad => 0.45,
            Emotion::Relaxed => 0.4,
            Emotion::Surprised => 0.55,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ExpressionBlender {
    target: Emotion,
    strength: f32,
    weights: [f32; 6],
}

impl Default for ExpressionBlender {
    fn default() -> Self {
        Self::new()
    }
}

impl ExpressionBlender {
    pub fn new() -> Self {
        Self { target: Emotion::Neutral, strength: 1.0, weights: [0.0; 6] }
    }

    pub fn set_emotion(&mut self, emotion: Emotion, strength: f32) {
        self.target = emotion;
        self.strength = strength.clamp(0.0, 1.0);
    }

    pub fn emotion(&self) -> Emotion {
        self.target
    }

    pub fn weight(&self, emotion: Emotion) -> f32 {
        self.weights[emotion.index()]
    }

    fn target_weight(&self, emotion: Emotion) -> f32 {
        if emotion == self.target {
            emotion.peak_weight() * self.strength
        } else {
            0.0
        }
    }

    pub fn is_settled(&self) -> bool {
        Emotion::ALL.iter().all(|emotion| (self.weight(*emotion) - self.target_weight(*emotion)).abs() <= SETTLE_EPSILON)
    }

    /// One blend step; returns whether any weight is still moving.
    pub fn step(&mut self) -> bool {
        let mut moving = false;
        for emotion in Emotion::ALL {
            let target = self.target_weight(emotion);
            let slot = &mut self.weights[emotion.index()];
            *slot += (target - *slot) * BLEND_RATE;
            if (*slot - target).abs() > SETTLE_EPSILON {
                moving = true;
            }
        }
        moving
    }

    pub fn weights(&self) -> impl Iterator<Item = (Emotion, f32)> + '_ {
        Emotion::ALL.into_iter().map(|emotion| (emotion, self.weight(emotion)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blends_toward_scaled_peak_and_settles() {
        let mut blender = ExpressionBlender::new();
        blender.set_emotion(Emotion::parse("Happy"), 0.5);
        let mut steps = 0;
        while blender.step() {
            steps += 1;
            assert!(steps < 500, "blend never settled");
        }
        assert!((blender.weight(Emotion::Happy) - 0.3).abs() <= SETTLE_EPSILON);
        assert!(blender.is_settled());

        blender.set_emotion(Emotion::parse("bored"), 1.0);
        assert_eq!(blender.emotion(), Emotion::Neutral);
        while blender.step() {}
        assert!(blender.weight(Emotion::Happy) <= SETTLE_EPSILON);
    }
}
