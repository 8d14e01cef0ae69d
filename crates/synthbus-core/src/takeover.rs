//! Takeover state machine.
//!
//! Decides whether audio round-trips through the companion. Requests may
//! arrive at any time; state changes that affect routing only happen at
//! frame boundaries, so a frame is either fully local or fully round-tripped.

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum TakeoverState {
    /// Host outputs locally, no shared audio traffic.
    #[default]
    Direct = 0,
    /// Takeover agreed, waiting for the next frame boundary.
    Pending = 1,
    /// Audio round-trips through the companion every frame.
    Active = 2,
    /// Drop back to direct requested, completes at the next frame boundary.
    Releasing = 3,
}

impl TakeoverState {
    /// Unknown values read back from shared memory decode as `Direct`.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => TakeoverState::Pending,
            2 => TakeoverState::Active,
            3 => TakeoverState::Releasing,
            _ => TakeoverState::Direct,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            TakeoverState::Direct => "direct",
            TakeoverState::Pending => "pending",
            TakeoverState::Active => "active",
            TakeoverState::Releasing => "releasing",
        }
    }

    /// Whether the frame that reads this state exchanges audio with the companion.
    pub fn routes_through_companion(self) -> bool {
        self == TakeoverState::Active
    }
}

impl std::fmt::Display for TakeoverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u32)]
pub enum TakeoverRequest {
    #[default]
    None = 0,
    Takeover = 1,
    Release = 2,
}

impl TakeoverRequest {
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            1 => TakeoverRequest::Takeover,
            2 => TakeoverRequest::Release,
            _ => TakeoverRequest::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TakeoverEvent {
    RequestTakeover,
    RequestRelease,
    FrameBoundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    None,
    StateChanged {
        from: TakeoverState,
        to: TakeoverState,
    },
    /// A request arrived while releasing and will apply once the release completes.
    Queued(TakeoverRequest),
}

/// Pure transition logic.
///
/// The live values are stored in the region header and only mutated under
/// the metadata mutex; this type is loaded from and stored back to those
/// fields around each event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TakeoverMachine {
    state: TakeoverState,
    queued: TakeoverRequest,
}

impl TakeoverMachine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_parts(state: TakeoverState, queued: TakeoverRequest) -> Self {
        Self { state, queued }
    }

    pub fn state(&self) -> TakeoverState {
        self.state
    }

    pub fn queued(&self) -> TakeoverRequest {
        self.queued
    }

    pub fn transition(&mut self, event: TakeoverEvent) -> TransitionResult {
        use TakeoverState::*;

        let from = self.state;
        match event {
            TakeoverEvent::RequestTakeover => match self.state {
                Direct => self.state = Pending,
                Pending | Active => {}
                Releasing => {
                    if self.queued == TakeoverRequest::Takeover {
                        return TransitionResult::None;
                    }
                    self.queued = TakeoverRequest::Takeover;
                    return TransitionResult::Queued(TakeoverRequest::Takeover);
                }
            },

            TakeoverEvent::RequestRelease => match self.state {
                Active | Pending => self.state = Releasing,
                Direct => {}
                Releasing => {
                    // Latest request wins: a release cancels a queued takeover.
                    if self.queued == TakeoverRequest::None {
                        return TransitionResult::None;
                    }
                    self.queued = TakeoverRequest::None;
                    return TransitionResult::Queued(TakeoverRequest::None);
                }
            },

            TakeoverEvent::FrameBoundary => match self.state {
                Pending => self.state = Active,
                Releasing => {
                    self.state = if self.queued == TakeoverRequest::Takeover {
                        Pending
                    } else {
                        Direct
                    };
                    self.queued = TakeoverRequest::None;
                }
                Direct | Active => {}
            },
        }

        if self.state == from {
            TransitionResult::None
        } else {
            TransitionResult::StateChanged {
                from,
                to: self.state,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn run(machine: &mut TakeoverMachine, events: &[TakeoverEvent]) {
        for event in events {
            machine.transition(*event);
        }
    }

    #[test]
    fn test_full_cycle() {
        let mut machine = TakeoverMachine::new();
        assert_eq!(machine.state(), TakeoverState::Direct);

        assert_eq!(
            machine.transition(TakeoverEvent::RequestTakeover),
            TransitionResult::StateChanged {
                from: TakeoverState::Direct,
                to: TakeoverState::Pending
            }
        );
        machine.transition(TakeoverEvent::FrameBoundary);
        assert_eq!(machine.state(), TakeoverState::Active);

        machine.transition(TakeoverEvent::RequestRelease);
        assert_eq!(machine.state(), TakeoverState::Releasing);
        machine.transition(TakeoverEvent::FrameBoundary);
        assert_eq!(machine.state(), TakeoverState::Direct);
    }

    #[test]
    fn test_requests_are_idempotent() {
        let mut machine = TakeoverMachine::new();
        machine.transition(TakeoverEvent::RequestTakeover);
        assert_eq!(
            machine.transition(TakeoverEvent::RequestTakeover),
            TransitionResult::None
        );
        assert_eq!(machine.state(), TakeoverState::Pending);

        let mut direct = TakeoverMachine::new();
        assert_eq!(
            direct.transition(TakeoverEvent::RequestRelease),
            TransitionResult::None
        );
        assert_eq!(
            direct.transition(TakeoverEvent::FrameBoundary),
            TransitionResult::None
        );
    }

    #[test]
    fn test_pending_can_be_released_before_activation() {
        let mut machine = TakeoverMachine::new();
        machine.transition(TakeoverEvent::RequestTakeover);
        machine.transition(TakeoverEvent::RequestRelease);
        assert_eq!(machine.state(), TakeoverState::Releasing);
        machine.transition(TakeoverEvent::FrameBoundary);
        assert_eq!(machine.state(), TakeoverState::Direct);
    }

    #[test]
    fn test_takeover_during_release_is_queued() {
        let mut machine = TakeoverMachine::from_parts(TakeoverState::Releasing, TakeoverRequest::None);
        assert_eq!(
            machine.transition(TakeoverEvent::RequestTakeover),
            TransitionResult::Queued(TakeoverRequest::Takeover)
        );
        assert_eq!(machine.state(), TakeoverState::Releasing);

        // The in-flight release completes first, then the queued takeover applies.
        assert_eq!(
            machine.transition(TakeoverEvent::FrameBoundary),
            TransitionResult::StateChanged {
                from: TakeoverState::Releasing,
                to: TakeoverState::Pending
            }
        );
        assert_eq!(machine.queued(), TakeoverRequest::None);
        machine.transition(TakeoverEvent::FrameBoundary);
        assert_eq!(machine.state(), TakeoverState::Active);
    }

    #[test]
    fn test_release_overrides_queued_takeover() {
        let mut machine = TakeoverMachine::from_parts(TakeoverState::Releasing, TakeoverRequest::None);
        machine.transition(TakeoverEvent::RequestTakeover);
        assert_eq!(
            machine.transition(TakeoverEvent::RequestRelease),
            TransitionResult::Queued(TakeoverRequest::None)
        );
        machine.transition(TakeoverEvent::FrameBoundary);
        assert_eq!(machine.state(), TakeoverState::Direct);
    }

    #[test]
    fn test_raw_round_trip() {
        for state in [
            TakeoverState::Direct,
            TakeoverState::Pending,
            TakeoverState::Active,
            TakeoverState::Releasing,
        ] {
            assert_eq!(TakeoverState::from_raw(state as u32), state);
        }
        assert_eq!(TakeoverState::from_raw(99), TakeoverState::Direct);
        assert_eq!(TakeoverRequest::from_raw(7), TakeoverRequest::None);
    }

    fn event_strategy() -> impl Strategy<Value = TakeoverEvent> {
        prop_oneof![
            Just(TakeoverEvent::RequestTakeover),
            Just(TakeoverEvent::RequestRelease),
            Just(TakeoverEvent::FrameBoundary),
        ]
    }

    proptest! {
        #[test]
        fn queued_request_only_exists_while_releasing(
            events in proptest::collection::vec(event_strategy(), 0..64)
        ) {
            let mut machine = TakeoverMachine::new();
            for event in events {
                machine.transition(event);
                if machine.queued() != TakeoverRequest::None {
                    prop_assert_eq!(machine.state(), TakeoverState::Releasing);
                }
            }
        }

        #[test]
        fn routing_changes_only_at_frame_boundaries(
            events in proptest::collection::vec(event_strategy(), 0..64)
        ) {
            let mut machine = TakeoverMachine::new();
            for event in events {
                let routed_before = machine.state().routes_through_companion();
                machine.transition(event);
                if event != TakeoverEvent::FrameBoundary && machine.state().routes_through_companion() {
                    prop_assert!(routed_before);
                }
            }
        }

        #[test]
        fn latest_request_wins(
            events in proptest::collection::vec(event_strategy(), 0..64),
            last_is_takeover in any::<bool>()
        ) {
            let mut machine = TakeoverMachine::new();
            run(&mut machine, &events);

            if last_is_takeover {
                machine.transition(TakeoverEvent::RequestTakeover);
                run(&mut machine, &[TakeoverEvent::FrameBoundary, TakeoverEvent::FrameBoundary]);
                prop_assert_eq!(machine.state(), TakeoverState::Active);
            } else {
                machine.transition(TakeoverEvent::RequestRelease);
                machine.transition(TakeoverEvent::FrameBoundary);
                prop_assert_eq!(machine.state(), TakeoverState::Direct);
            }
        }
    }
}
