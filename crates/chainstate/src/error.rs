use bitd_pow::CompactError;
use bitd_primitives::encoding::DecodeError;
use bitd_script::ScriptError;
use bitd_storage::StoreError;

#[derive(Debug)]
pub enum ChainstateError {
    Store(StoreError),
    Decode(DecodeError),
    Compact(CompactError),
    Script(ScriptError),
    MissingPrevout,
    DoubleSpend,
    OverlayConflict,
    PrevoutMismatch,
    UnknownBlock,
    MissingBlockData,
    InvariantViolation(&'static str),
}

impl ChainstateError {
    /// Consensus-class failures abort the current reorg step via rollback;
    /// everything else is fatal to the control loop.
    pub fn is_validation_failure(&self) -> bool {
        matches!(
            self,
            ChainstateError::Script(_)
                | ChainstateError::MissingPrevout
                | ChainstateError::DoubleSpend
                | ChainstateError::OverlayConflict
                | ChainstateError::PrevoutMismatch
        )
    }
}

impl std::fmt::Display for ChainstateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChainstateError::Store(err) => write!(f, "storage: {err}"),
            ChainstateError::Decode(err) => write!(f, "decode: {err}"),
            ChainstateError::Compact(err) => write!(f, "{err}"),
            ChainstateError::Script(err) => write!(f, "script: {err}"),
            ChainstateError::MissingPrevout => write!(f, "previous output not found"),
            ChainstateError::DoubleSpend => write!(f, "previous output already spent in batch"),
            ChainstateError::OverlayConflict => write!(f, "utxo overlay conflict"),
            ChainstateError::PrevoutMismatch => {
                write!(f, "previous output count does not match inputs")
            }
            ChainstateError::UnknownBlock => write!(f, "block not in index"),
            ChainstateError::MissingBlockData => write!(f, "block body not in storage"),
            ChainstateError::InvariantViolation(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for ChainstateError {}

impl From<StoreError> for ChainstateError {
    fn from(err: StoreError) -> Self {
        ChainstateError::Store(err)
    }
}

impl From<DecodeError> for ChainstateError {
    fn from(err: DecodeError) -> Self {
        ChainstateError::Decode(err)
    }
}

impl From<CompactError> for ChainstateError {
    fn from(err: CompactError) -> Self {
        ChainstateError::Compact(err)
    }
}

impl From<ScriptError> for ChainstateError {
    fn from(err: ScriptError) -> Self {
        ChainstateError::Script(err)
    }
}
