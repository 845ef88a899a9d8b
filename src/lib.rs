pub mod app;
pub mod blogger;
pub mod bot;
pub mod clock;
pub mod config;
pub mod movies;
pub mod telemetry;
pub mod transfer;
pub mod util;
