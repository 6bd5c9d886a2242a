//! Audio collaborator interface.
//!
//! The mixer itself is external; the frame loop hands it the commands
//! scripts queued during the tick. The silent mixer satisfies headless
//! runs and tests.

use tracing::debug;
use wintermute_core::HostCommand;

pub trait AudioMixer {
    fn play_sound(&mut self, path: &str);
    fn speak(&mut self, text: &str, duration_ms: u64);
    fn stop_all(&mut self);
}

impl<T: AudioMixer + ?Sized> AudioMixer for Box<T> {
    fn play_sound(&mut self, path: &str) {
        (**self).play_sound(path);
    }

    fn speak(&mut self, text: &str, duration_ms: u64) {
        (**self).speak(text, duration_ms);
    }

    fn stop_all(&mut self) {
        (**self).stop_all();
    }
}

/// Routes one tick's queued commands to the mixer. Returns true when a
/// quit was requested.
pub fn route_commands(mixer: &mut impl AudioMixer, commands: &[HostCommand]) -> bool {
    let mut quit = false;
    for command in commands {
        match command {
            HostCommand::PlaySound { path } => mixer.play_sound(path),
            HostCommand::Speech {
                text, duration_ms, ..
            } => mixer.speak(text, *duration_ms),
            HostCommand::Quit => quit = true,
        }
    }
    quit
}

/// Discards everything, with a debug trace for test inspection.
#[derive(Debug, Default)]
pub struct SilentMixer {
    pub played: Vec<String>,
    pub spoken: Vec<String>,
}

impl SilentMixer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioMixer for SilentMixer {
    fn play_sound(&mut self, path: &str) {
        debug!(path, "sound discarded by the silent mixer");
        self.played.push(path.to_string());
    }

    fn speak(&mut self, text: &str, duration_ms: u64) {
        debug!(text, duration_ms, "speech discarded by the silent mixer");
        self.spoken.push(text.to_string());
    }

    fn stop_all(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use wintermute_core::{ObjectHandle, SharedStr};

    #[test]
    fn commands_route_to_the_mixer() {
        let mut mixer = SilentMixer::new();
        let quit = route_commands(
            &mut mixer,
            &[
                HostCommand::PlaySound {
                    path: SharedStr::from("sfx/door.ogg"),
                },
                HostCommand::Speech {
                    actor: ObjectHandle::new(3),
                    text: SharedStr::from("Who goes there?"),
                    duration_ms: 1100,
                },
            ],
        );
        assert!(!quit);
        assert_eq!(mixer.played, ["sfx/door.ogg"]);
        assert_eq!(mixer.spoken, ["Who goes there?"]);

        assert!(route_commands(&mut mixer, &[HostCommand::Quit]));
    }
}
