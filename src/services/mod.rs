//! Domain rules that sit between the HTTP layer and storage.

pub mod board;
pub mod dates;
pub mod history;
pub mod links;
pub mod password;
pub mod phase_duration;
pub mod project_defaults;
pub mod rights;
