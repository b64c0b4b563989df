//! Song input: an ordered list of notes for the sequencer to cycle through.
//!
//! Accepted tokens, separated by whitespace or commas:
//! - note names, naturals or sharps (`A`, `C#`); flats are refused
//! - integer indices, folded into the octave (`14` is D)

use crate::error::{Result, StrikeError};
use crate::geometry::NoteIndex;

/// A B C D E F G, the rig's warm-up phrase.
pub const DEFAULT_SONG: [NoteIndex; 7] = [
    NoteIndex::A,
    NoteIndex::B,
    NoteIndex::C,
    NoteIndex::D,
    NoteIndex::E,
    NoteIndex::F,
    NoteIndex::G,
];

pub fn parse_song(source: &str) -> Result<Vec<NoteIndex>> {
    let notes = source
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|token| !token.is_empty())
        .enumerate()
        .map(|(position, token)| parse_token(position, token))
        .collect::<Result<Vec<_>>>()?;

    if notes.is_empty() {
        return Err(StrikeError::SongError {
            position: 0,
            message: "song has no notes".to_string(),
        });
    }
    Ok(notes)
}

/// Fold raw indices into notes, rejecting an empty list.
pub fn song_from_indices(indices: &[i64]) -> Result<Vec<NoteIndex>> {
    if indices.is_empty() {
        return Err(StrikeError::SongError {
            position: 0,
            message: "song has no notes".to_string(),
        });
    }
    Ok(indices.iter().map(|&i| NoteIndex::wrapping(i)).collect())
}

fn parse_token(position: usize, token: &str) -> Result<NoteIndex> {
    if let Ok(index) = token.parse::<i64>() {
        return Ok(NoteIndex::wrapping(index));
    }
    NoteIndex::from_name(token).map_err(|e| StrikeError::SongError {
        position,
        message: match e {
            StrikeError::ConfigError(message) => message,
            other => other.to_string(),
        },
    })
}
