//! Raw profile → breakdown tree

#![allow(clippy::cast_precision_loss)]

use crate::breakdown::BreakdownNode;
use crate::domain::ProfileError;

use super::source::RawProfile;

/// Prefix of every function belonging to the agent itself
const AGENT_FRAME_PREFIX: &str = "stackpulse::";
const AGENT_IMPL_PREFIX: &str = "<stackpulse::";

/// Whether a frame label points into the agent's own code
#[must_use]
pub fn is_agent_frame(label: &str) -> bool {
    label.starts_with(AGENT_FRAME_PREFIX) || label.contains(AGENT_IMPL_PREFIX)
}

/// Fold every sample of `profile` into `root`.
///
/// Frames hang outermost-first below `root`; each sample adds its
/// `value_type` column to the innermost frame's node and its `count_type`
/// column to that node's sample count. Samples with a zero value are skipped.
/// Returns the number of samples folded in.
///
/// # Errors
/// [`ProfileError::MissingSampleType`] if either column is absent,
/// [`ProfileError::MalformedSample`] if a sample is shorter than the columns
pub fn build_call_graph(
    profile: &RawProfile,
    value_type: &str,
    count_type: &str,
    root: &BreakdownNode,
) -> Result<usize, ProfileError> {
    let value_column =
        profile.column(value_type).ok_or_else(|| ProfileError::MissingSampleType(value_type.to_string()))?;
    let count_column =
        profile.column(count_type).ok_or_else(|| ProfileError::MissingSampleType(count_type.to_string()))?;
    let expected = value_column.max(count_column) + 1;

    let mut folded = 0;
    for (index, sample) in profile.samples.iter().enumerate() {
        let (Some(&value), Some(&count)) = (sample.values.get(value_column), sample.values.get(count_column)) else {
            return Err(ProfileError::MalformedSample { index, found: sample.values.len(), expected });
        };
        if value == 0 {
            continue;
        }

        let mut path = sample.frames.iter().rev();
        let Some(outermost) = path.next() else {
            root.increment(value as f64, count);
            folded += 1;
            continue;
        };
        let mut node = root.get_or_create_child(&outermost.to_string());
        for frame in path {
            node = node.get_or_create_child(&frame.to_string());
        }
        node.increment(value as f64, count);
        folded += 1;
    }
    Ok(folded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiling::source::{RawSample, SampleType, StackFrame};

    fn frame(function: &str, line: u32) -> StackFrame {
        StackFrame::new(function, "src/main.rs", line)
    }

    fn heap_profile(samples: Vec<RawSample>) -> RawProfile {
        RawProfile {
            sample_types: vec![SampleType::new("inuse_objects", "count"), SampleType::new("inuse_space", "bytes")],
            samples,
        }
    }

    #[test]
    fn test_frames_nest_outermost_first() {
        let profile = heap_profile(vec![
            RawSample { frames: vec![frame("alloc_buf", 30), frame("handle", 20), frame("main", 10)], values: vec![2, 4096] },
            RawSample { frames: vec![frame("parse", 40), frame("handle", 20), frame("main", 10)], values: vec![1, 1024] },
        ]);
        let root = BreakdownNode::root();
        assert_eq!(build_call_graph(&profile, "inuse_space", "inuse_objects", &root).unwrap(), 2);

        let main = root.find_child("main (src/main.rs:10)").unwrap();
        let handle = main.find_child("handle (src/main.rs:20)").unwrap();
        let alloc = handle.find_child("alloc_buf (src/main.rs:30)").unwrap();
        assert!((alloc.measurement() - 4096.0).abs() < f64::EPSILON);
        assert_eq!(alloc.sample_count(), 2);
        // Self values only; propagation happens later
        assert!(handle.measurement().abs() < f64::EPSILON);

        root.propagate();
        assert!((root.measurement() - 5120.0).abs() < f64::EPSILON);
        assert_eq!(root.sample_count(), 3);
    }

    #[test]
    fn test_zero_value_samples_skipped() {
        let profile = heap_profile(vec![RawSample { frames: vec![frame("main", 10)], values: vec![0, 0] }]);
        let root = BreakdownNode::root();
        assert_eq!(build_call_graph(&profile, "inuse_space", "inuse_objects", &root).unwrap(), 0);
        assert_eq!(root.child_count(), 0);
    }

    #[test]
    fn test_missing_sample_type() {
        let root = BreakdownNode::root();
        let err = build_call_graph(&heap_profile(vec![]), "cpu", "samples", &root).unwrap_err();
        assert!(matches!(err, ProfileError::MissingSampleType(ref kind) if kind == "cpu"));
    }

    #[test]
    fn test_short_sample_rejected() {
        let profile = heap_profile(vec![RawSample { frames: vec![frame("main", 10)], values: vec![1] }]);
        let root = BreakdownNode::root();
        let err = build_call_graph(&profile, "inuse_space", "inuse_objects", &root).unwrap_err();
        assert!(matches!(err, ProfileError::MalformedSample { index: 0, found: 1, expected: 2 }));
    }

    #[test]
    fn test_agent_frames_recognized() {
        assert!(is_agent_frame("stackpulse::scheduler::run_guarded (src/scheduler.rs:10)"));
        assert!(is_agent_frame("<stackpulse::delivery::LogTransport as Transport>::upload (?)"));
        assert!(!is_agent_frame("shop::checkout (src/shop.rs:1)"));
    }
}
