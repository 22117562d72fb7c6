use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

pub type PersonId = String;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Participant {
    pub id: PersonId,
    pub name: String,
    pub email: String,
}

/// One giver → recipient edge of a completed draw.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Pairing {
    pub giver: PersonId,
    pub recipient: PersonId,
}

/// The full result of a draw: a bijection over the participant set with
/// no participant assigned to themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Assignment {
    pairs: Vec<Pairing>,
}

impl Assignment {
    pub fn pairs(&self) -> &[Pairing] {
        &self.pairs
    }

    pub fn recipient_of(&self, giver: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|p| p.giver == giver)
            .map(|p| p.recipient.as_str())
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DrawError {
    #[error("a draw needs at least 2 participants, found {found}")]
    InsufficientParticipants { found: usize },
    #[error("duplicate participant id: {id}")]
    DuplicateParticipant { id: PersonId },
}

/// Compute a uniformly random derangement of `participants`.
///
/// Shuffle-and-resample: shuffle a copy of the sequence, pair input
/// position i with shuffled position i, and reshuffle whenever any
/// participant lands on themselves. Every accepted permutation is a
/// derangement and all derangements are equally likely. With two
/// participants the only accepted outcome is the mutual swap.
pub fn draw<R: Rng + ?Sized>(
    participants: &[Participant],
    rng: &mut R,
) -> Result<Assignment, DrawError> {
    if participants.len() < 2 {
        return Err(DrawError::InsufficientParticipants {
            found: participants.len(),
        });
    }

    let mut seen = HashSet::new();
    for p in participants {
        if !seen.insert(&p.id) {
            return Err(DrawError::DuplicateParticipant { id: p.id.clone() });
        }
    }

    let mut recipients: Vec<&Participant> = participants.iter().collect();
    loop {
        recipients.shuffle(rng);
        if participants
            .iter()
            .zip(&recipients)
            .all(|(giver, recipient)| giver.id != recipient.id)
        {
            break;
        }
    }

    let pairs = participants
        .iter()
        .zip(&recipients)
        .map(|(giver, recipient)| Pairing {
            giver: giver.id.clone(),
            recipient: recipient.id.clone(),
        })
        .collect();

    Ok(Assignment { pairs })
}
