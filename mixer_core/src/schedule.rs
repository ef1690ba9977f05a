//! Validated flow schedules for playback.

use crate::error::MixerError;

/// Longest schedule the controller will play, in seconds.
pub const MAX_DURATION_S: f64 = 3600.0;

/// A time column plus one flow column per commanded channel.
///
/// Times are finite, non-negative, strictly increasing and at most
/// `MAX_DURATION_S`. An empty table is valid here; the controller refuses
/// to play it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleTable {
    names: Vec<String>,
    time: Vec<f64>,
    /// `columns[channel][row]`
    columns: Vec<Vec<f64>>,
}

impl ScheduleTable {
    pub fn new(
        names: Vec<String>,
        time: Vec<f64>,
        columns: Vec<Vec<f64>>,
    ) -> Result<Self, MixerError> {
        let bad = |msg: String| Err(MixerError::Config(format!("schedule: {msg}")));
        if names.len() != columns.len() {
            return bad(format!(
                "{} channel names for {} columns",
                names.len(),
                columns.len()
            ));
        }
        if let Some(c) = columns.iter().position(|c| c.len() != time.len()) {
            return bad(format!(
                "column {} has {} rows, time has {}",
                names[c],
                columns[c].len(),
                time.len()
            ));
        }
        for (i, t) in time.iter().enumerate() {
            if !t.is_finite() || *t < 0.0 {
                return bad(format!("time at row {i} must be finite and >= 0"));
            }
            if *t > MAX_DURATION_S {
                return bad(format!("time {t} exceeds {MAX_DURATION_S} seconds"));
            }
            if i > 0 && *t <= time[i - 1] {
                return bad(format!("time must be strictly increasing (row {i})"));
            }
        }
        if columns.iter().flatten().any(|v| !v.is_finite()) {
            return bad("flow values must be finite".to_string());
        }
        Ok(Self {
            names,
            time,
            columns,
        })
    }

    /// Rows given as `(time, flows)`, with generated channel names.
    pub fn from_rows(rows: &[(f64, Vec<f64>)]) -> Result<Self, MixerError> {
        let width = rows.first().map_or(0, |r| r.1.len());
        if rows.iter().any(|r| r.1.len() != width) {
            return Err(MixerError::Config(
                "schedule: rows have differing widths".into(),
            ));
        }
        let names = (1..=width).map(|i| format!("MFC {i}")).collect();
        let time = rows.iter().map(|r| r.0).collect();
        let columns = (0..width)
            .map(|c| rows.iter().map(|r| r.1[c]).collect())
            .collect();
        Self::new(names, time, columns)
    }

    pub fn len(&self) -> usize {
        self.time.len()
    }

    pub fn is_empty(&self) -> bool {
        self.time.is_empty()
    }

    pub fn channels(&self) -> usize {
        self.columns.len()
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn times(&self) -> &[f64] {
        &self.time
    }

    pub fn time_at(&self, row: usize) -> Option<f64> {
        self.time.get(row).copied()
    }

    /// Flows of one row in channel order.
    pub fn row(&self, row: usize) -> Option<Vec<f64>> {
        if row >= self.len() {
            return None;
        }
        Some(self.columns.iter().map(|c| c[row]).collect())
    }

    /// Seconds from the first to the last row.
    pub fn duration_s(&self) -> f64 {
        match (self.time.first(), self.time.last()) {
            (Some(a), Some(b)) => b - a,
            _ => 0.0,
        }
    }

    /// Linearly interpolate onto an evenly spaced timeline.
    ///
    /// The new timeline starts at the first row and always ends exactly at
    /// the last one.
    pub fn resample(&self, resolution_s: f64) -> Result<Self, MixerError> {
        if !(resolution_s.is_finite() && resolution_s > 0.0) {
            return Err(MixerError::Config(
                "schedule: resolution must be > 0".into(),
            ));
        }
        if self.len() < 2 {
            return Ok(self.clone());
        }
        let start = self.time[0];
        let end = self.time[self.len() - 1];
        let steps = ((end - start) / resolution_s + 1e-9).floor() as usize;
        let mut time: Vec<f64> = (0..=steps)
            .map(|k| start + k as f64 * resolution_s)
            .filter(|t| *t < end - 1e-9)
            .collect();
        time.push(end);

        let columns = self
            .columns
            .iter()
            .map(|col| time.iter().map(|t| interp(&self.time, col, *t)).collect())
            .collect();
        Self::new(self.names.clone(), time, columns)
    }
}

fn interp(xs: &[f64], ys: &[f64], x: f64) -> f64 {
    let i = xs.partition_point(|v| *v <= x);
    if i == 0 {
        return ys[0];
    }
    if i >= xs.len() {
        return ys[ys.len() - 1];
    }
    let (x0, x1) = (xs[i - 1], xs[i]);
    let (y0, y1) = (ys[i - 1], ys[i]);
    y0 + (y1 - y0) * (x - x0) / (x1 - x0)
}

impl TryFrom<&mixer_config::ScheduleCsv> for ScheduleTable {
    type Error = MixerError;

    fn try_from(csv: &mixer_config::ScheduleCsv) -> Result<Self, Self::Error> {
        Self::new(
            csv.channel_names().to_vec(),
            csv.time.clone(),
            csv.columns.clone(),
        )
    }
}
