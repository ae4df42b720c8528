use std::io;

/// Failure while reading or writing the fee-estimates file.
///
/// Both directions are non-fatal: callers log and fall back to defaults.
#[derive(Debug, thiserror::Error)]
pub enum EstimatesFileError {
    #[error("fee estimates file requires client version {required} (ours: {client})")]
    UpVersion { required: u32, client: u32 },

    #[error(transparent)]
    Io(#[from] io::Error),
}
