pub mod convert_logs;
pub mod run;
