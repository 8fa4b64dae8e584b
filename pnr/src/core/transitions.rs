//! Chunk lifecycle edges.
//!
//! The only legal edges are `ready -> executing` (backend started) and
//! `executing -> completed` (flowout asserted). Everything else, including
//! leaving `completed`, is rejected.

use crate::core::types::ChunkStatus;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("chunk '{chunk}': illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub chunk: String,
    pub from: ChunkStatus,
    pub to: ChunkStatus,
}

/// True if `from -> to` is an edge of the chunk lifecycle.
pub fn is_legal(from: ChunkStatus, to: ChunkStatus) -> bool {
    matches!(
        (from, to),
        (ChunkStatus::Ready, ChunkStatus::Executing)
            | (ChunkStatus::Executing, ChunkStatus::Completed)
    )
}

/// Move `status` to `to`, or leave it untouched and return an error.
pub fn advance(chunk: &str, status: &mut ChunkStatus, to: ChunkStatus) -> Result<(), TransitionError> {
    if !is_legal(*status, to) {
        return Err(TransitionError {
            chunk: chunk.to_string(),
            from: *status,
            to,
        });
    }
    *status = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ChunkStatus; 3] = [
        ChunkStatus::Ready,
        ChunkStatus::Executing,
        ChunkStatus::Completed,
    ];

    #[test]
    fn only_forward_edges_are_legal() {
        let mut legal = Vec::new();
        for from in ALL {
            for to in ALL {
                if is_legal(from, to) {
                    legal.push((from, to));
                }
            }
        }
        assert_eq!(
            legal,
            vec![
                (ChunkStatus::Ready, ChunkStatus::Executing),
                (ChunkStatus::Executing, ChunkStatus::Completed),
            ]
        );
    }

    #[test]
    fn completed_is_terminal() {
        for to in ALL {
            let mut status = ChunkStatus::Completed;
            assert!(advance("db", &mut status, to).is_err());
            assert_eq!(status, ChunkStatus::Completed);
        }
    }

    #[test]
    fn ready_cannot_skip_to_completed() {
        let mut status = ChunkStatus::Ready;
        let err = advance("db", &mut status, ChunkStatus::Completed).unwrap_err();
        assert_eq!(status, ChunkStatus::Ready);
        assert_eq!(
            err.to_string(),
            "chunk 'db': illegal status transition ready -> completed"
        );
    }

    #[test]
    fn advance_walks_the_lifecycle() {
        let mut status = ChunkStatus::Ready;
        advance("db", &mut status, ChunkStatus::Executing).expect("start");
        advance("db", &mut status, ChunkStatus::Completed).expect("complete");
        assert_eq!(status, ChunkStatus::Completed);
    }
}
