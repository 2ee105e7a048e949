//! Operator-interaction collaborator interface, per spec.md §6.5.
//!
//! This is deliberately out of the core's scope beyond the interface: the
//! real terminal/TUI prompting lives in the driver. `diffarc-core` ships
//! one implementation, [`LoggingInteraction`], that is enough to run the
//! engine end-to-end non-interactively — it logs through
//! `fsfill`'s hand-rolled [`crate::logger::Logger`] transcript sink
//! (kept for this purpose, see DESIGN.md) and answers every pause with a
//! fixed default, matching the "beep_on_prompt"-less batch mode of the
//! options record in spec.md §9.

use crate::logger::Logger;

/// A message sink the core prompts through when it needs the operator:
/// to mount the next slice, to confirm an overwrite, to supply a
/// password. spec.md §6.5.
pub trait Interaction {
    fn message(&mut self, text: &str);
    fn pause(&mut self, text: &str) -> bool;
    fn get_string(&mut self, prompt: &str, echo: bool) -> Option<String>;
    fn get_secret(&mut self, prompt: &str) -> Option<String>;
}

/// Default batch-mode implementation: transcribes everything to the
/// [`Logger`] sink and always answers `pause` with `default_answer`.
pub struct LoggingInteraction {
    logger: Logger,
    pub default_answer: bool,
}

impl LoggingInteraction {
    pub fn new(logger: Logger, default_answer: bool) -> Self
    {
        Self {
            logger,
            default_answer,
        }
    }
}

impl Interaction for LoggingInteraction {
    fn message(&mut self, text: &str)
    {
        self.logger.log(1, text);
    }

    fn pause(&mut self, text: &str) -> bool
    {
        self.logger.log(
            0,
            &format!("{text} [auto-answer: {}]", self.default_answer),
        );
        self.default_answer
    }

    fn get_string(&mut self, prompt: &str, _echo: bool) -> Option<String>
    {
        self.logger.log(0, &format!("{prompt} [no operator attached]"));
        None
    }

    fn get_secret(&mut self, prompt: &str) -> Option<String>
    {
        self.get_string(prompt, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pause_returns_default_answer()
    {
        let mut ia = LoggingInteraction::new(Logger::new(0, None), true);
        assert!(ia.pause("mount next slice?"));
        let mut ia2 = LoggingInteraction::new(Logger::new(0, None), false);
        assert!(!ia2.pause("mount next slice?"));
    }
}
