use maxfilter_rs::MaxfilterError;

pub const SUCCESS: i32 = 0;
pub const CONFIG_ERROR: i32 = 2;
pub const PARAMETER_ERROR: i32 = 3;
pub const MISSING_INPUT: i32 = 4;
pub const FILTER_ERROR: i32 = 5;
pub const WRITE_ERROR: i32 = 6;
pub const ENGINE_NOT_FOUND: i32 = 7;

pub fn for_error(err: &MaxfilterError) -> i32 {
    match err {
        MaxfilterError::Config(_) => CONFIG_ERROR,
        MaxfilterError::ParameterRange { .. } | MaxfilterError::ParameterConflict { .. } => {
            PARAMETER_ERROR
        }
        MaxfilterError::MissingInput { .. } => MISSING_INPUT,
        // IoError only arises mapping engine exchange files back in
        MaxfilterError::IllConditionedMatrix { .. }
        | MaxfilterError::AlreadyProcessed(_)
        | MaxfilterError::Engine(_)
        | MaxfilterError::IoError(_) => FILTER_ERROR,
        MaxfilterError::EngineNotFound(_) => ENGINE_NOT_FOUND,
        MaxfilterError::Write { .. } | MaxfilterError::Report(_) => WRITE_ERROR,
    }
}
