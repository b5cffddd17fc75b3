//! Booking domain: slot validation, the single-shot utterance parser, and the
//! slot-filling dialogue.

pub mod dialogue;
pub mod parser;
pub mod slots;

pub use dialogue::{DialogueEngine, InvalidStep, Step, Turn, TurnKind};
pub use parser::{parse_utterance, ParseError, EXAMPLE_UTTERANCE};
pub use slots::{BookingRequest, BookingSlots, SlotError};
