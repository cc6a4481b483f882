//! Pure state transition function (§4.5 transition table).

use super::effect::Effect;
use super::event::Event;
use super::state::TmState;
use thiserror::Error;

#[derive(Debug)]
pub struct TransitionResult {
    pub new_state: TmState,
    pub effects: Vec<Effect>,
}

impl TransitionResult {
    fn new(state: TmState) -> Self {
        Self { new_state: state, effects: vec![] }
    }

    fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }
}

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("action not legal in state '{state}'")]
    IllegalAction { state: &'static str },
}

/// No I/O, no process handles: given the same `(state, event)` this always
/// returns the same `(new_state, effects)`. The runtime is responsible for
/// actually starting/stopping tools, packaging, and publishing status.
pub fn transition(state: &TmState, event: Event) -> Result<TransitionResult, TransitionError> {
    match (state, event) {
        (TmState::Startup, Event::Init) => {
            Ok(TransitionResult::new(TmState::Idle).with_effect(Effect::StartPersistentCollectors))
        }

        (TmState::Idle, Event::Start { directory }) => Ok(TransitionResult::new(TmState::Running {
            directory: directory.clone(),
        })
        .with_effect(Effect::StartTransientTools { directory })),

        (TmState::Running { directory }, Event::Stop) => {
            Ok(TransitionResult::new(TmState::Idle)
                .with_effect(Effect::StopTransientTools { directory: directory.clone() }))
        }

        // `send` leaves the coarse state unchanged in every non-startup state.
        (TmState::Idle, Event::Send) | (TmState::Running { .. }, Event::Send) | (TmState::Shutdown, Event::Send) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::Send))
        }

        (TmState::Startup, Event::Sysinfo { args }) | (TmState::Shutdown, Event::Sysinfo { args }) => {
            Ok(TransitionResult::new(state.clone()).with_effect(Effect::RunSysinfo { args }))
        }

        (TmState::Idle, Event::End) => {
            Ok(TransitionResult::new(TmState::Shutdown).with_effect(Effect::StopPersistentCollectors))
        }

        (_, Event::Terminate) => Ok(TransitionResult::new(TmState::Shutdown).with_effect(Effect::Exit)),

        (illegal_state, _) => Err(TransitionError::IllegalAction { state: illegal_state.name() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_starts_persistent_collectors_and_moves_to_idle() {
        let result = transition(&TmState::Startup, Event::Init).unwrap();
        assert_eq!(result.new_state, TmState::Idle);
        assert!(matches!(result.effects[..], [Effect::StartPersistentCollectors]));
    }

    #[test]
    fn start_requires_idle_and_moves_to_running() {
        let result = transition(&TmState::Idle, Event::Start { directory: "/run/1".to_string() }).unwrap();
        assert_eq!(result.new_state, TmState::Running { directory: "/run/1".to_string() });
    }

    #[test]
    fn start_from_startup_is_illegal() {
        let result = transition(&TmState::Startup, Event::Start { directory: "/run/1".to_string() });
        assert!(matches!(result, Err(TransitionError::IllegalAction { .. })));
    }

    #[test]
    fn stop_moves_running_back_to_idle() {
        let state = TmState::Running { directory: "/run/1".to_string() };
        let result = transition(&state, Event::Stop).unwrap();
        assert_eq!(result.new_state, TmState::Idle);
        assert!(matches!(
            result.effects[..],
            [Effect::StopTransientTools { ref directory }] if directory == "/run/1"
        ));
    }

    #[test]
    fn send_is_legal_in_any_non_startup_state() {
        for state in [
            TmState::Idle,
            TmState::Running { directory: "/run/1".to_string() },
            TmState::Shutdown,
        ] {
            let result = transition(&state, Event::Send).unwrap();
            assert_eq!(result.new_state, state);
        }
        assert!(transition(&TmState::Startup, Event::Send).is_err());
    }

    #[test]
    fn sysinfo_is_only_legal_in_startup_or_shutdown() {
        assert!(transition(&TmState::Startup, Event::Sysinfo { args: vec![] }).is_ok());
        assert!(transition(&TmState::Shutdown, Event::Sysinfo { args: vec![] }).is_ok());
        assert!(transition(&TmState::Idle, Event::Sysinfo { args: vec![] }).is_err());
    }

    #[test]
    fn terminate_always_exits() {
        for state in [
            TmState::Startup,
            TmState::Idle,
            TmState::Running { directory: "/run/1".to_string() },
            TmState::Shutdown,
        ] {
            let result = transition(&state, Event::Terminate).unwrap();
            assert_eq!(result.new_state, TmState::Shutdown);
            assert!(matches!(result.effects[..], [Effect::Exit]));
        }
    }
}
