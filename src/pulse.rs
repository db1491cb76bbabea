use std::ops::{Index, IndexMut};

use serde::{Deserialize, Serialize};

use crate::edges::NUM_CHANNELS;

/// Falling edge time, in nanoseconds, used for pulses without a matching falling edge.
///
/// Sized for muon decay measurements.
pub const MAX_TRIGGER_WINDOW: f64 = 9960.0;

/// A reconstructed pulse on a single channel.
///
/// Times are in nanoseconds relative to the trigger of the event the pulse belongs to.
#[derive(Serialize, Deserialize, Debug, Default, Clone, Copy, PartialEq)]
pub struct Pulse {
    pub rising: f64,
    pub falling: f64,
}

impl Pulse {
    /// True when no falling edge was observed for this pulse and `falling` holds the
    /// `max_trigger_window` sentinel.
    #[must_use]
    pub fn is_open(&self, max_trigger_window: f64) -> bool {
        self.falling == max_trigger_window
    }

    /// Time between rising and falling edge.
    #[must_use]
    pub fn width(&self) -> f64 {
        self.falling - self.rising
    }
}

/// Pulses per channel, ordered by rising edge time.
#[derive(Serialize, Deserialize, Debug, Default, Clone, PartialEq)]
pub struct EdgeMap([Vec<Pulse>; NUM_CHANNELS]);

impl EdgeMap {
    #[must_use]
    pub fn new(channels: [Vec<Pulse>; NUM_CHANNELS]) -> Self {
        EdgeMap(channels)
    }

    /// Pulses for channel `ch`, or `None` if `ch` is not a valid channel.
    #[must_use]
    pub fn channel(&self, ch: usize) -> Option<&[Pulse]> {
        self.0.get(ch).map(Vec::as_slice)
    }

    /// Iterate over `(channel, pulses)`.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[Pulse])> + '_ {
        self.0.iter().map(Vec::as_slice).enumerate()
    }

    /// Total number of pulses over all channels.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.iter().all(Vec::is_empty)
    }
}

impl Index<usize> for EdgeMap {
    type Output = Vec<Pulse>;

    fn index(&self, ch: usize) -> &Self::Output {
        &self.0[ch]
    }
}

impl IndexMut<usize> for EdgeMap {
    fn index_mut(&mut self, ch: usize) -> &mut Self::Output {
        &mut self.0[ch]
    }
}

/// Pair the rising and falling edges of a single channel into pulses.
///
/// Edges are paired by position: the i-th rising edge goes with the i-th falling edge, which
/// is how the DAQ reports them. When there is no i-th falling edge, or it comes before its
/// rising edge, the pulse gets the `max_trigger_window` sentinel as its falling edge.
///
/// The result is sorted by rising edge time; pulses with equal rising times keep the order of
/// their rising edges.
///
/// # Example
/// ```
/// use daqpulse::pulse::{assemble, MAX_TRIGGER_WINDOW};
///
/// let pulses = assemble(&[10.0, 2.5], &[20.0], MAX_TRIGGER_WINDOW);
/// assert_eq!(pulses[0].rising, 2.5);
/// assert_eq!(pulses[0].falling, MAX_TRIGGER_WINDOW);
/// assert_eq!(pulses[1].falling, 20.0);
/// ```
#[must_use]
pub fn assemble(rising: &[f64], falling: &[f64], max_trigger_window: f64) -> Vec<Pulse> {
    let mut pulses: Vec<Pulse> = rising
        .iter()
        .enumerate()
        .map(|(i, &re)| {
            let falling = match falling.get(i) {
                Some(&fe) if fe >= re => fe,
                _ => max_trigger_window,
            };
            Pulse { rising: re, falling }
        })
        .collect();
    // sort_by is stable
    pulses.sort_by(|a, b| a.rising.total_cmp(&b.rising));
    pulses
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matched_edges() {
        let rising = [30.0, 1.25, 12.5];
        let falling = [45.0, 10.0, 20.0];

        let pulses = assemble(&rising, &falling, MAX_TRIGGER_WINDOW);

        assert_eq!(
            pulses,
            vec![
                Pulse { rising: 1.25, falling: 10.0 },
                Pulse { rising: 12.5, falling: 20.0 },
                Pulse { rising: 30.0, falling: 45.0 },
            ]
        );
        for p in &pulses {
            assert!(p.falling >= p.rising);
            assert!(!p.is_open(MAX_TRIGGER_WINDOW));
        }
    }

    #[test]
    fn inverted_pair_gets_sentinel() {
        let pulses = assemble(&[20.0], &[5.0], MAX_TRIGGER_WINDOW);

        assert_eq!(pulses.len(), 1);
        assert_eq!(pulses[0].rising, 20.0);
        assert_eq!(pulses[0].falling, MAX_TRIGGER_WINDOW);
        assert!(pulses[0].is_open(MAX_TRIGGER_WINDOW));
    }

    #[test]
    fn missing_falling_gets_sentinel() {
        let pulses = assemble(&[1.25, 2.5, 3.75], &[2.0], MAX_TRIGGER_WINDOW);

        assert_eq!(pulses.len(), 3);
        assert_eq!(pulses[0].falling, 2.0);
        assert_eq!(pulses[1].falling, MAX_TRIGGER_WINDOW);
        assert_eq!(pulses[2].falling, MAX_TRIGGER_WINDOW);
    }

    #[test]
    fn extra_falling_ignored() {
        let pulses = assemble(&[1.25], &[2.5, 5.0, 7.5], MAX_TRIGGER_WINDOW);
        assert_eq!(pulses, vec![Pulse { rising: 1.25, falling: 2.5 }]);
    }

    #[test]
    fn no_rising_no_pulses() {
        assert!(assemble(&[], &[2.5], MAX_TRIGGER_WINDOW).is_empty());
    }

    #[test]
    fn equal_rising_keeps_arrival_order() {
        let pulses = assemble(&[5.0, 5.0, 1.0], &[9.0, 6.0, 2.0], MAX_TRIGGER_WINDOW);

        assert_eq!(pulses[0], Pulse { rising: 1.0, falling: 2.0 });
        assert_eq!(pulses[1], Pulse { rising: 5.0, falling: 9.0 });
        assert_eq!(pulses[2], Pulse { rising: 5.0, falling: 6.0 });
    }

    #[test]
    fn custom_window() {
        let pulses = assemble(&[1.0], &[], 60.0);
        assert_eq!(pulses[0].falling, 60.0);
        assert!(pulses[0].is_open(60.0));
    }

    #[test]
    fn edge_map_access() {
        let mut map = EdgeMap::default();
        assert!(map.is_empty());
        map[2].push(Pulse { rising: 1.0, falling: 3.0 });

        assert_eq!(map.len(), 1);
        assert_eq!(map.channel(2).unwrap().len(), 1);
        assert!(map.channel(0).unwrap().is_empty());
        assert_eq!(map.channel(4), None);
        assert_eq!(map.iter().filter(|(_, p)| !p.is_empty()).count(), 1);
        assert_eq!(map[2][0].width(), 2.0);
    }
}
