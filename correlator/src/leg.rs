use strum_macros::EnumString;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LegError {
    #[error("invalid transition: {input} in {state}")]
    InvalidTransition { state: LegState, input: LegInput },
}

#[derive(strum_macros::Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegState {
    Idle,
    Dialed,
    Offered,
    Ringing,
    Established,
    Talking,
    Held,
    Redirected,
    Transferred,
    Dropped,
}

#[derive(strum_macros::Display, EnumString, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LegInput {
    Dial,
    Offer,
    Alert,
    Answer,
    MediaUp,
    Hold,
    Resume,
    Redirect,
    Transfer,
    Drop,
}

//                          Idle
//                  Dial  /      \  Offer
//                       V        V
//                  Dialed        Offered
//                       \  Alert  /
//                        V       V
//                         Ringing ------------+
//                            | Answer         | Redirect
//                            V                V
//                       Established      Redirected
//                            | MediaUp        ^
//                            V                | Redirect
//          Transferred <-- Talking <------> Held
//                 Transfer          Hold/Resume
//
//   Dialed and Offered may also be answered directly. Established and
//   Talking legs can be redirected or transferred too. Drop from any
//   non-final state goes to Dropped. Redirected, Transferred and Dropped
//   are final: the call continues on a new leg starting from Idle.
impl LegState {
    pub fn is_final(self) -> bool {
        matches!(
            self,
            LegState::Redirected | LegState::Transferred | LegState::Dropped
        )
    }

    pub fn next(self, input: LegInput) -> Result<LegState, LegError> {
        use LegInput::*;
        use LegState::*;
        let next = match (self, input) {
            (state, Drop) if !state.is_final() => Dropped,

            (Idle, Dial) => Dialed,
            (Idle, Offer) => Offered,

            (Dialed, Alert) | (Offered, Alert) => Ringing,
            (Dialed, Answer) | (Ringing, Answer) | (Offered, Answer) => Established,

            (Established, MediaUp) => Talking,
            (Established, Hold) | (Talking, Hold) => Held,
            (Held, Resume) => Talking,

            (Ringing, Redirect) | (Established, Redirect) | (Talking, Redirect)
            | (Held, Redirect) => Redirected,
            (Talking, Transfer) | (Held, Transfer) | (Established, Transfer) => Transferred,

            (state, input) => {
                return Err(LegError::InvalidTransition { state, input });
            }
        };
        Ok(next)
    }
}

/// The state of one leg, advanced by the inputs the service reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Leg {
    state: LegState,
}

impl Default for Leg {
    fn default() -> Self {
        Self { state: LegState::Idle }
    }
}

impl Leg {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> LegState {
        self.state
    }

    pub fn apply(&mut self, input: LegInput) -> Result<LegState, LegError> {
        self.state = self.state.next(input)?;
        Ok(self.state)
    }

    /// Applies a run of inputs, stopping at the first invalid one.
    pub fn apply_all(&mut self, inputs: &[LegInput]) -> Result<LegState, LegError> {
        for input in inputs {
            self.apply(*input)?;
        }
        Ok(self.state)
    }

    /// Whether the leg has reached a point where `input` is allowed.
    pub fn accepts(&self, input: LegInput) -> bool {
        self.state.next(input).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use LegInput::*;

    #[test]
    fn outbound_leg_to_talking_and_drop() {
        let mut leg = Leg::new();
        assert_eq!(leg.apply_all(&[Dial, Alert, Answer, MediaUp]), Ok(LegState::Talking));
        assert_eq!(leg.apply(Drop), Ok(LegState::Dropped));
        assert!(leg.state().is_final());
    }

    #[test]
    fn held_leg_can_be_redirected() {
        let mut leg = Leg::new();
        leg.apply_all(&[Offer, Alert, Answer, MediaUp, Hold]).unwrap();
        assert_eq!(leg.apply(Redirect), Ok(LegState::Redirected));
        // the redirected call shows up as a fresh leg at the destination
        let mut next = Leg::new();
        assert_eq!(next.apply_all(&[Offer, Alert]), Ok(LegState::Ringing));
    }

    #[test]
    fn ringing_leg_can_be_redirected() {
        let mut leg = Leg::new();
        leg.apply_all(&[Offer, Alert]).unwrap();
        assert!(leg.accepts(Redirect));
        assert!(!leg.accepts(Hold));
    }

    #[test]
    fn talking_leg_transfers() {
        let mut leg = Leg::new();
        leg.apply_all(&[Dial, Answer, MediaUp]).unwrap();
        assert_eq!(leg.apply(Transfer), Ok(LegState::Transferred));
    }

    #[test]
    fn invalid_transitions_are_reported() {
        let mut leg = Leg::new();
        assert_eq!(
            leg.apply(Hold),
            Err(LegError::InvalidTransition { state: LegState::Idle, input: Hold })
        );
        leg.apply_all(&[Dial, Drop]).unwrap();
        let err = leg.apply(Drop).unwrap_err();
        assert_eq!(err.to_string(), "invalid transition: Drop in Dropped");
        assert_eq!(leg.state(), LegState::Dropped);
    }
}
