pub mod analyze;
pub mod consult;
