pub mod history;

pub use history::{EditHistory, EditStep, HistoryError};
