pub mod check;
pub mod connectors;
pub mod run;
