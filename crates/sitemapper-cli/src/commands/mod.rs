//! Command implementations.

mod dry_run;
mod generate;

pub use dry_run::dry_run;
pub use generate::generate;
