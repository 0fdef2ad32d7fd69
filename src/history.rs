//! Optional per-iteration training history.

use ndarray::Array1;
use std::collections::BTreeSet;

use crate::IterationState;

/// Entries reserved up front are capped so that an enormous iteration budget does
/// not translate into an enormous allocation before the first step.
const MAX_PREALLOCATED_ENTRIES: usize = 100_000;

/// A quantity whose value can be recorded at every iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum HistoryChannel {
    Parameters,
    ParametersNorm,
    Performance,
    SelectionPerformance,
    Gradient,
    GradientNorm,
    TrainingDirection,
    TrainingRate,
    ElapsedTime,
}

impl HistoryChannel {
    pub const ALL: [HistoryChannel; 9] = [
        HistoryChannel::Parameters,
        HistoryChannel::ParametersNorm,
        HistoryChannel::Performance,
        HistoryChannel::SelectionPerformance,
        HistoryChannel::Gradient,
        HistoryChannel::GradientNorm,
        HistoryChannel::TrainingDirection,
        HistoryChannel::TrainingRate,
        HistoryChannel::ElapsedTime,
    ];
}

/// The set of channels to record. Channels not in the set are never populated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct HistoryChannels(BTreeSet<HistoryChannel>);

impl HistoryChannels {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        HistoryChannel::ALL.into_iter().collect()
    }

    pub fn with(mut self, channel: HistoryChannel) -> Self {
        self.0.insert(channel);
        self
    }

    pub fn set(&mut self, channel: HistoryChannel, reserve: bool) {
        if reserve {
            self.0.insert(channel);
        } else {
            self.0.remove(&channel);
        }
    }

    pub fn contains(&self, channel: HistoryChannel) -> bool {
        self.0.contains(&channel)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = HistoryChannel> + '_ {
        self.0.iter().copied()
    }
}

impl FromIterator<HistoryChannel> for HistoryChannels {
    fn from_iter<I: IntoIterator<Item = HistoryChannel>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Recorded values, one entry per iteration (iteration 0 included) for every
/// reserved channel.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TrainingHistory {
    pub parameters: Vec<Array1<f64>>,
    pub parameters_norm: Vec<f64>,
    pub performance: Vec<f64>,
    /// `None` entries mark iterations without a selection evaluator.
    pub selection_performance: Vec<Option<f64>>,
    pub gradient: Vec<Array1<f64>>,
    pub gradient_norm: Vec<f64>,
    pub training_direction: Vec<Array1<f64>>,
    pub training_rate: Vec<f64>,
    /// Seconds since the start of the run.
    pub elapsed_time: Vec<f64>,
}

impl TrainingHistory {
    /// Number of entries recorded on `channel`.
    pub fn len(&self, channel: HistoryChannel) -> usize {
        match channel {
            HistoryChannel::Parameters => self.parameters.len(),
            HistoryChannel::ParametersNorm => self.parameters_norm.len(),
            HistoryChannel::Performance => self.performance.len(),
            HistoryChannel::SelectionPerformance => self.selection_performance.len(),
            HistoryChannel::Gradient => self.gradient.len(),
            HistoryChannel::GradientNorm => self.gradient_norm.len(),
            HistoryChannel::TrainingDirection => self.training_direction.len(),
            HistoryChannel::TrainingRate => self.training_rate.len(),
            HistoryChannel::ElapsedTime => self.elapsed_time.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        HistoryChannel::ALL.iter().all(|&c| self.len(c) == 0)
    }

    fn reserve(&mut self, channel: HistoryChannel, additional: usize) {
        match channel {
            HistoryChannel::Parameters => self.parameters.reserve_exact(additional),
            HistoryChannel::ParametersNorm => self.parameters_norm.reserve_exact(additional),
            HistoryChannel::Performance => self.performance.reserve_exact(additional),
            HistoryChannel::SelectionPerformance => self.selection_performance.reserve_exact(additional),
            HistoryChannel::Gradient => self.gradient.reserve_exact(additional),
            HistoryChannel::GradientNorm => self.gradient_norm.reserve_exact(additional),
            HistoryChannel::TrainingDirection => self.training_direction.reserve_exact(additional),
            HistoryChannel::TrainingRate => self.training_rate.reserve_exact(additional),
            HistoryChannel::ElapsedTime => self.elapsed_time.reserve_exact(additional),
        }
    }

    fn shrink_to_fit(&mut self) {
        self.parameters.shrink_to_fit();
        self.parameters_norm.shrink_to_fit();
        self.performance.shrink_to_fit();
        self.selection_performance.shrink_to_fit();
        self.gradient.shrink_to_fit();
        self.gradient_norm.shrink_to_fit();
        self.training_direction.shrink_to_fit();
        self.training_rate.shrink_to_fit();
        self.elapsed_time.shrink_to_fit();
    }
}

/// Appends the reserved channels of each iteration state to a [`TrainingHistory`].
#[derive(Debug)]
pub struct HistoryRecorder {
    channels: HistoryChannels,
    history: TrainingHistory,
}

impl HistoryRecorder {
    /// Creates a recorder sized for `maximum_iterations + 1` entries per reserved channel.
    pub fn new(channels: HistoryChannels, maximum_iterations: usize) -> Self {
        let mut history = TrainingHistory::default();
        let capacity = maximum_iterations
            .saturating_add(1)
            .min(MAX_PREALLOCATED_ENTRIES);
        for channel in channels.iter() {
            history.reserve(channel, capacity);
        }
        Self { channels, history }
    }

    pub fn record(&mut self, state: &IterationState) {
        let h = &mut self.history;
        for channel in self.channels.iter() {
            match channel {
                HistoryChannel::Parameters => h.parameters.push(state.parameters.clone()),
                HistoryChannel::ParametersNorm => h.parameters_norm.push(state.parameters_norm),
                HistoryChannel::Performance => h.performance.push(state.performance),
                HistoryChannel::SelectionPerformance => {
                    h.selection_performance.push(state.selection_performance)
                }
                HistoryChannel::Gradient => h.gradient.push(state.gradient.clone()),
                HistoryChannel::GradientNorm => h.gradient_norm.push(state.gradient_norm),
                HistoryChannel::TrainingDirection => {
                    h.training_direction.push(state.training_direction.clone())
                }
                HistoryChannel::TrainingRate => h.training_rate.push(state.training_rate),
                HistoryChannel::ElapsedTime => h.elapsed_time.push(state.elapsed_time),
            }
        }
    }

    /// Releases unused reserved capacity and hands the history over.
    pub fn finish(mut self) -> TrainingHistory {
        self.history.shrink_to_fit();
        self.history
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn state(iteration: usize) -> IterationState {
        let parameters = array![iteration as f64, 1.0];
        let gradient = array![1.0, 0.0];
        IterationState {
            iteration,
            parameters_norm: parameters.dot(&parameters).sqrt(),
            parameters,
            performance: 10.0 - iteration as f64,
            selection_performance: None,
            gradient_norm: 1.0,
            gradient,
            training_direction: array![-1.0, 0.0],
            training_rate: 0.5,
            parameters_increment_norm: 0.0,
            elapsed_time: 0.0,
            selection_increases: 0,
        }
    }

    #[test]
    fn test_only_reserved_channels_are_populated() {
        let channels = HistoryChannels::none()
            .with(HistoryChannel::Performance)
            .with(HistoryChannel::Parameters);
        let mut recorder = HistoryRecorder::new(channels, 10);
        for k in 0..4 {
            recorder.record(&state(k));
        }
        let history = recorder.finish();
        for channel in HistoryChannel::ALL {
            let expected = match channel {
                HistoryChannel::Performance | HistoryChannel::Parameters => 4,
                _ => 0,
            };
            assert_eq!(history.len(channel), expected, "{:?}", channel);
        }
        assert_eq!(history.performance, vec![10.0, 9.0, 8.0, 7.0]);
        assert_eq!(history.parameters[3], array![3.0, 1.0]);
    }

    #[test]
    fn test_capacity_is_trimmed_on_finish() {
        let mut recorder = HistoryRecorder::new(HistoryChannels::all(), 500);
        assert!(recorder.history.performance.capacity() >= 501);
        recorder.record(&state(0));
        let history = recorder.finish();
        assert_eq!(history.performance.len(), 1);
        assert!(history.performance.capacity() < 501);
    }

    #[test]
    fn test_huge_budget_does_not_preallocate_everything() {
        let recorder = HistoryRecorder::new(HistoryChannels::all(), usize::MAX);
        let capacity = recorder.history.training_rate.capacity();
        assert!(capacity >= MAX_PREALLOCATED_ENTRIES);
        assert!(capacity < 2 * MAX_PREALLOCATED_ENTRIES);
    }

    #[test]
    fn test_channel_set_operations() {
        let mut channels = HistoryChannels::all();
        assert_eq!(channels.iter().count(), 9);
        channels.set(HistoryChannel::Gradient, false);
        assert!(!channels.contains(HistoryChannel::Gradient));
        channels.set(HistoryChannel::Gradient, true);
        assert!(channels.contains(HistoryChannel::Gradient));
        assert!(HistoryChannels::none().is_empty());
    }
}
