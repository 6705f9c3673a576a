use pitch_types::Nanos;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A filter was asked to predict to a time before its last update.
    #[error("prediction time {requested} ns precedes filter time {filter_time} ns")]
    NonMonotonicTime { requested: Nanos, filter_time: Nanos },

    /// A detection referenced a camera without calibration.
    #[error("camera {0} has no calibration")]
    UnknownCamera(u32),
}

pub type Result<T> = std::result::Result<T, Error>;
