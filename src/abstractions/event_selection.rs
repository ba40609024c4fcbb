use crate::error::VmError;

/// Local event chosen for a tick with no pending inbound message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Action {
    Internal,
    /// Send to the peer at this index of the peer list.
    SendToPeer(usize),
    SendAll,
}

/// Maps one uniform draw in `[0, 1)` to an [`Action`].
///
/// With `p` the internal event probability and `s = (1 - p) / 3`, the table is evaluated in
/// order: `r < p` is internal, `r < p + s` sends to peer 0, `r < p + 2s` sends to peer 1, and
/// anything above is a send to every peer.
#[derive(Clone, Debug, PartialEq)]
pub struct EventPolicy {
    thresholds: [(f64, Action); 3],
}

impl EventPolicy {
    pub fn new(internal_event_probability: f64) -> Result<Self, VmError> {
        let p = internal_event_probability;
        if !(0.0..1.0).contains(&p) {
            return Err(VmError::InvalidProbability(p));
        }
        let share = (1.0 - p) / 3.0;

        Ok(Self {
            thresholds: [
                (p, Action::Internal),
                (p + share, Action::SendToPeer(0)),
                (p + 2.0 * share, Action::SendToPeer(1)),
            ],
        })
    }

    pub fn select(&self, draw: f64) -> Action {
        self.thresholds
            .iter()
            .find(|(threshold, _)| draw < *threshold)
            .map(|(_, action)| *action)
            .unwrap_or(Action::SendAll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_probabilities_outside_unit_interval() {
        for p in [-0.1, 1.0, 1.5, f64::NAN] {
            assert!(matches!(
                EventPolicy::new(p),
                Err(VmError::InvalidProbability(_))
            ));
        }
    }

    #[test]
    fn thresholds_in_tie_break_order() {
        let policy = EventPolicy::new(0.4).unwrap();

        assert_eq!(policy.select(0.0), Action::Internal);
        assert_eq!(policy.select(0.399), Action::Internal);
        assert_eq!(policy.select(0.4), Action::SendToPeer(0));
        assert_eq!(policy.select(0.59), Action::SendToPeer(0));
        assert_eq!(policy.select(0.61), Action::SendToPeer(1));
        assert_eq!(policy.select(0.79), Action::SendToPeer(1));
        assert_eq!(policy.select(0.81), Action::SendAll);
        assert_eq!(policy.select(0.999), Action::SendAll);
    }

    #[test]
    fn zero_probability_never_selects_internal() {
        let policy = EventPolicy::new(0.0).unwrap();

        assert_eq!(policy.select(0.0), Action::SendToPeer(0));
        assert_eq!(policy.select(0.5), Action::SendToPeer(1));
        assert_eq!(policy.select(0.9), Action::SendAll);
    }
}
