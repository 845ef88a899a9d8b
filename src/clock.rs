use chrono::DateTime;
use chrono::Local;
use chrono::TimeZone;

/// Source of the wall-clock strings shown by the `time` and `date` buttons.
pub trait Clock: Send + Sync {
  fn now(&self) -> String;
  fn today(&self) -> String;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now(&self) -> String {
    format_time(&Local::now())
  }

  fn today(&self) -> String {
    format_date(&Local::now())
  }
}

pub fn format_time<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
  Tz::Offset: std::fmt::Display,
{
  at.format("%H:%M:%S").to_string()
}

pub fn format_date<Tz: TimeZone>(at: &DateTime<Tz>) -> String
where
  Tz::Offset: std::fmt::Display,
{
  at.format("%Y-%m-%d").to_string()
}
