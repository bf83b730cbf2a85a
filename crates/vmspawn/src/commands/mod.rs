pub mod check;
pub mod poll;
pub mod start;
pub mod state;
pub mod stop;
pub mod userdata;
