pub mod evaluator;
pub mod exporter;
pub mod matrix;
pub mod strategy;
pub mod symbol_evaluator;
pub mod task_manager;

pub use evaluator::{shared, Evaluator, Notifier, RsiEvaluator, SharedEvaluator};
pub use exporter::MatrixExporter;
pub use matrix::{EvalNote, EvaluationMatrix, EvaluatorKind, MatrixEntry, MatrixSnapshot};
pub use strategy::{StrategyEvaluator, WeightedAverageStrategy};
pub use symbol_evaluator::SymbolEvaluator;
pub use task_manager::{EvaluatorTaskManager, TaskState, OHLCV_SOURCE};
