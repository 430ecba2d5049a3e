pub mod check;
pub mod components;
pub mod run;
