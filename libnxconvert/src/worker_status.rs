use std::fmt;

/// Stages of one conversion, in order. Any stage may move to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Stage {
    #[default]
    New,
    Compiled,
    Templated,
    Populated,
    Validated,
    Written,
    Done,
    Failed,
}

impl Stage {
    /// Fraction of the conversion completed once this stage is reached
    pub fn progress(&self) -> f32 {
        match self {
            Self::New => 0.0,
            Self::Compiled => 0.15,
            Self::Templated => 0.25,
            Self::Populated => 0.5,
            Self::Validated => 0.65,
            Self::Written => 0.95,
            Self::Done | Self::Failed => 1.0,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::New => "NEW",
            Self::Compiled => "COMPILED",
            Self::Templated => "TEMPLATED",
            Self::Populated => "POPULATED",
            Self::Validated => "VALIDATED",
            Self::Written => "WRITTEN",
            Self::Done => "DONE",
            Self::Failed => "FAILED",
        };
        write!(f, "{name}")
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConversionStatus {
    pub progress: f32,
    pub stage: Stage,
}

impl ConversionStatus {
    pub fn new(stage: Stage) -> Self {
        Self {
            progress: stage.progress(),
            stage,
        }
    }
}
