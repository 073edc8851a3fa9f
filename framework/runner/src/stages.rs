use std::time::Duration;

use stampede_core::prelude::ConfigurationError;

/// A time-bounded leg of the ramp profile.
///
/// Over `duration`, the number of virtual users moves linearly from the previous stage's target
/// (or the schedule's start target for the first stage) to `target`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stage {
    pub duration: Duration,
    pub target: usize,
}

impl Stage {
    pub fn new(duration: Duration, target: usize) -> Self {
        Self { duration, target }
    }
}

/// What the schedule asks for at a point in the run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleTarget {
    /// Keep this many virtual users running.
    Active(usize),
    /// Every stage has elapsed, the run should drain.
    Complete,
}

/// The ramp profile of a run. Validated on construction and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSchedule {
    stages: Vec<Stage>,
    start_target: usize,
    total_duration: Duration,
}

impl StageSchedule {
    pub fn new(stages: Vec<Stage>) -> Result<Self, ConfigurationError> {
        if stages.is_empty() {
            return Err(ConfigurationError::new("at least one stage is required"));
        }

        let total_duration = stages.iter().map(|s| s.duration).sum::<Duration>();
        if total_duration.is_zero() {
            return Err(ConfigurationError::new(
                "stage durations must add up to more than zero",
            ));
        }

        Ok(Self {
            stages,
            start_target: 0,
            total_duration,
        })
    }

    /// Number of virtual users at the very start of the run. Defaults to 0.
    pub fn with_start_target(mut self, start_target: usize) -> Self {
        self.start_target = start_target;
        self
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn start_target(&self) -> usize {
        self.start_target
    }

    pub fn total_duration(&self) -> Duration {
        self.total_duration
    }

    /// The largest number of virtual users the schedule will ever ask for.
    pub fn peak_target(&self) -> usize {
        self.stages
            .iter()
            .map(|s| s.target)
            .fold(self.start_target, usize::max)
    }

    /// Target concurrency `elapsed` after the start of the run.
    ///
    /// Inside a stage the value is interpolated between the stage's starting and ending targets
    /// and rounded to the nearest whole user. A stage with zero duration is a step change. Once
    /// `elapsed` reaches the total duration, the schedule is complete.
    pub fn target_at(&self, elapsed: Duration) -> ScheduleTarget {
        if elapsed >= self.total_duration {
            return ScheduleTarget::Complete;
        }

        let mut stage_start = Duration::ZERO;
        let mut from = self.start_target;
        for stage in &self.stages {
            let stage_end = stage_start + stage.duration;
            if elapsed < stage_end {
                let progress =
                    (elapsed - stage_start).as_secs_f64() / stage.duration.as_secs_f64();
                let to = stage.target as f64;
                let value = from as f64 + (to - from as f64) * progress;

                return ScheduleTarget::Active(value.round().max(0.0) as usize);
            }

            stage_start = stage_end;
            from = stage.target;
        }

        ScheduleTarget::Complete
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: u64) -> Duration {
        Duration::from_secs(s)
    }

    fn ramp_hold_ramp() -> StageSchedule {
        StageSchedule::new(vec![
            Stage::new(secs(30), 100),
            Stage::new(secs(60), 100),
            Stage::new(secs(30), 0),
        ])
        .unwrap()
    }

    #[test]
    fn ramp_up_hold_and_ramp_down() {
        let schedule = ramp_hold_ramp();

        assert_eq!(secs(120), schedule.total_duration());
        assert_eq!(ScheduleTarget::Active(0), schedule.target_at(secs(0)));
        assert_eq!(ScheduleTarget::Active(50), schedule.target_at(secs(15)));
        assert_eq!(ScheduleTarget::Active(100), schedule.target_at(secs(30)));
        assert_eq!(ScheduleTarget::Active(100), schedule.target_at(secs(45)));
        assert_eq!(ScheduleTarget::Active(100), schedule.target_at(secs(90)));
        assert_eq!(ScheduleTarget::Active(50), schedule.target_at(secs(105)));
        assert_eq!(ScheduleTarget::Active(33), schedule.target_at(secs(110)));
        assert_eq!(ScheduleTarget::Complete, schedule.target_at(secs(120)));
        assert_eq!(ScheduleTarget::Complete, schedule.target_at(secs(125)));
    }

    #[test]
    fn targets_stay_between_stage_boundaries() {
        let schedule = StageSchedule::new(vec![
            Stage::new(secs(10), 7),
            Stage::new(secs(5), 3),
            Stage::new(secs(20), 12),
        ])
        .unwrap();

        let bounds = [(0, 10, 0, 7), (10, 15, 3, 7), (15, 35, 3, 12)];
        for ms in (0..35_000).step_by(250) {
            let t = Duration::from_millis(ms);
            let ScheduleTarget::Active(target) = schedule.target_at(t) else {
                panic!("schedule completed early at {t:?}");
            };
            let (_, _, lo, hi) = bounds
                .iter()
                .find(|(start, end, _, _)| t >= secs(*start) && t < secs(*end))
                .unwrap();
            assert!(
                (*lo..=*hi).contains(&target),
                "target {target} at {t:?} outside [{lo}, {hi}]"
            );
        }
    }

    #[test]
    fn start_target_is_used_at_time_zero() {
        let schedule = StageSchedule::new(vec![Stage::new(secs(10), 20)])
            .unwrap()
            .with_start_target(10);

        assert_eq!(ScheduleTarget::Active(10), schedule.target_at(secs(0)));
        assert_eq!(ScheduleTarget::Active(15), schedule.target_at(secs(5)));
        assert_eq!(20, schedule.peak_target());
    }

    #[test]
    fn zero_duration_stage_is_a_step() {
        let schedule = StageSchedule::new(vec![
            Stage::new(Duration::ZERO, 40),
            Stage::new(secs(10), 40),
        ])
        .unwrap();

        assert_eq!(ScheduleTarget::Active(40), schedule.target_at(secs(0)));
        assert_eq!(ScheduleTarget::Active(40), schedule.target_at(secs(9)));
    }

    #[test]
    fn empty_schedule_is_rejected() {
        let err = StageSchedule::new(vec![]).unwrap_err();
        assert_eq!("at least one stage is required", err.message());
    }

    #[test]
    fn schedule_without_duration_is_rejected() {
        assert!(StageSchedule::new(vec![Stage::new(Duration::ZERO, 10)]).is_err());
    }
}
