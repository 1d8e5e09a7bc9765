pub mod checker;

pub use checker::SymptomCheckerService;
