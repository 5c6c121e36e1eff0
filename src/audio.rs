//! Date-indexed audio file names.

use chrono::{Days, NaiveDate};

pub const DEFAULT_AUDIO_DIR: &str = "/audio";

/// One file name per day from `end` back to `start`, both inclusive.
///
/// Names follow `<dir>/<day>_<Month>_<year>.m4a`, e.g.
/// `/audio/24_October_2024.m4a`. An `end` before `start` gives nothing.
pub fn generate_audio_file_list(dir: &str, start: NaiveDate, end: NaiveDate) -> Vec<String> {
  let dir = dir.trim_end_matches('/');
  let mut files = Vec::new();
  let mut date = end;
  while date >= start {
    files.push(format!("{}/{}", dir, date.format("%-d_%B_%Y.m4a")));
    match date.checked_sub_days(Days::new(1)) {
      Some(prev) => date = prev,
      None => break,
    }
  }
  files
}

#[cfg(test)]
mod tests {
  use super::*;

  fn day(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
  }

  #[test]
  fn test_two_day_range_is_descending() {
    let files = generate_audio_file_list(DEFAULT_AUDIO_DIR, day(2024, 10, 24), day(2024, 10, 25));
    assert_eq!(
      files,
      vec!["/audio/25_October_2024.m4a", "/audio/24_October_2024.m4a"]
    );
  }

  #[test]
  fn test_names_match_day_month_year_pattern() {
    let files = generate_audio_file_list("/audio/", day(2024, 12, 30), day(2025, 1, 2));
    assert_eq!(files.len(), 4);
    assert_eq!(files[0], "/audio/2_January_2025.m4a");
    assert_eq!(files[3], "/audio/30_December_2024.m4a");
    for file in &files {
      let name = file.strip_prefix("/audio/").unwrap();
      let parts: Vec<&str> = name.trim_end_matches(".m4a").split('_').collect();
      assert_eq!(parts.len(), 3);
      assert!(parts[0].parse::<u32>().is_ok());
      assert!(parts[2].parse::<i32>().is_ok());
    }
  }

  #[test]
  fn test_single_day_and_empty_ranges() {
    let d = day(2024, 10, 24);
    assert_eq!(generate_audio_file_list(DEFAULT_AUDIO_DIR, d, d).len(), 1);
    assert!(generate_audio_file_list(DEFAULT_AUDIO_DIR, d, day(2024, 10, 23)).is_empty());
  }
}
