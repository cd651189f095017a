use std::fmt;

/// Lifecycle of a [`crate::RepeaterLauncher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RunningStatus {
    #[default]
    Off,
    Starting,
    Running,
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunningStatus::Off => write!(f, "off"),
            RunningStatus::Starting => write!(f, "starting"),
            RunningStatus::Running => write!(f, "running"),
        }
    }
}
