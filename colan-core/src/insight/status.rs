//! Overall-status aggregation.
//!
//! The overall status is derived, never assigned directly: whenever any
//! per-task status changes, it is recomputed from the full snapshot.

use colan_model::{InferenceStatus, OverallStatus, TaskStatus};

/// Fold every tracked per-task status into one overall status.
///
/// The result is terminal only when every sub-status is terminal, and a
/// single failed sub-task makes the terminal result `Failed`.
pub fn aggregate(inference: &InferenceStatus) -> OverallStatus {
    let statuses = inference.statuses();
    let all_terminal = statuses.iter().all(TaskStatus::is_terminal);
    let any_failed = statuses.iter().any(|s| *s == TaskStatus::Failed);

    if all_terminal {
        if any_failed {
            OverallStatus::Failed
        } else {
            OverallStatus::Completed
        }
    } else {
        OverallStatus::Processing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn inference(fd: TaskStatus, clip: TaskStatus, dino: TaskStatus) -> InferenceStatus {
        InferenceStatus {
            face_detection: fd,
            clip_embedding: clip,
            dino_embedding: dino,
            ..InferenceStatus::default()
        }
    }

    #[test]
    fn all_completed_is_completed() {
        let inf = inference(
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
        );
        assert_eq!(aggregate(&inf), OverallStatus::Completed);
    }

    #[test]
    fn failure_dominates_when_terminal() {
        let inf = inference(
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Completed,
        );
        assert_eq!(aggregate(&inf), OverallStatus::Failed);
    }

    #[test]
    fn any_non_terminal_status_means_processing() {
        let non_terminal = [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Running,
            TaskStatus::Available,
        ];
        for status in non_terminal {
            let inf = inference(TaskStatus::Completed, status, TaskStatus::Failed);
            assert_eq!(aggregate(&inf), OverallStatus::Processing, "{status}");
        }
    }

    #[test]
    fn full_grid_over_terminal_and_non_terminal_combinations() {
        let domain = [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ];
        for fd in domain {
            for clip in domain {
                for dino in domain {
                    let inf = inference(fd, clip, dino);
                    let all = [fd, clip, dino];
                    let expected = if all.iter().all(TaskStatus::is_terminal) {
                        if all.contains(&TaskStatus::Failed) {
                            OverallStatus::Failed
                        } else {
                            OverallStatus::Completed
                        }
                    } else {
                        OverallStatus::Processing
                    };
                    assert_eq!(aggregate(&inf), expected, "{fd} {clip} {dino}");
                }
            }
        }
    }

    #[test]
    fn face_slots_participate_in_aggregation() {
        let mut inf = inference(
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
        );
        inf.face_embeddings = vec![TaskStatus::Completed, TaskStatus::Pending];
        assert_eq!(aggregate(&inf), OverallStatus::Processing);

        inf.face_embeddings = vec![TaskStatus::Completed, TaskStatus::Failed];
        assert_eq!(aggregate(&inf), OverallStatus::Failed);
    }

    #[test]
    fn available_streaming_output_keeps_entity_processing() {
        let mut inf = inference(
            TaskStatus::Completed,
            TaskStatus::Completed,
            TaskStatus::Completed,
        );
        inf.hls_streaming = Some(TaskStatus::Available);
        assert_eq!(aggregate(&inf), OverallStatus::Processing);
    }
}
