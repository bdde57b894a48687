//! Hand landmark indices and the skeleton drawn between them.

pub const WRIST: usize = 0;
pub const THUMB_CMC: usize = 1;
pub const THUMB_MCP: usize = 2;
pub const THUMB_IP: usize = 3;
pub const THUMB_TIP: usize = 4;
pub const INDEX_FINGER_MCP: usize = 5;
pub const INDEX_FINGER_PIP: usize = 6;
pub const INDEX_FINGER_DIP: usize = 7;
pub const INDEX_FINGER_TIP: usize = 8;
pub const MIDDLE_FINGER_MCP: usize = 9;
pub const MIDDLE_FINGER_PIP: usize = 10;
pub const MIDDLE_FINGER_DIP: usize = 11;
pub const MIDDLE_FINGER_TIP: usize = 12;
pub const RING_FINGER_MCP: usize = 13;
pub const RING_FINGER_PIP: usize = 14;
pub const RING_FINGER_DIP: usize = 15;
pub const RING_FINGER_TIP: usize = 16;
pub const PINKY_MCP: usize = 17;
pub const PINKY_PIP: usize = 18;
pub const PINKY_DIP: usize = 19;
pub const PINKY_TIP: usize = 20;

/// Bones as landmark index pairs: each finger chain from the wrist, then the
/// palm links between the four finger MCP joints.
pub const HAND_CONNECTIONS: [(usize, usize); 23] = [
    // Thumb
    (WRIST, THUMB_CMC),
    (THUMB_CMC, THUMB_MCP),
    (THUMB_MCP, THUMB_IP),
    (THUMB_IP, THUMB_TIP),
    // Index finger
    (WRIST, INDEX_FINGER_MCP),
    (INDEX_FINGER_MCP, INDEX_FINGER_PIP),
    (INDEX_FINGER_PIP, INDEX_FINGER_DIP),
    (INDEX_FINGER_DIP, INDEX_FINGER_TIP),
    // Middle finger
    (WRIST, MIDDLE_FINGER_MCP),
    (MIDDLE_FINGER_MCP, MIDDLE_FINGER_PIP),
    (MIDDLE_FINGER_PIP, MIDDLE_FINGER_DIP),
    (MIDDLE_FINGER_DIP, MIDDLE_FINGER_TIP),
    // Ring finger
    (WRIST, RING_FINGER_MCP),
    (RING_FINGER_MCP, RING_FINGER_PIP),
    (RING_FINGER_PIP, RING_FINGER_DIP),
    (RING_FINGER_DIP, RING_FINGER_TIP),
    // Pinky
    (WRIST, PINKY_MCP),
    (PINKY_MCP, PINKY_PIP),
    (PINKY_PIP, PINKY_DIP),
    (PINKY_DIP, PINKY_TIP),
    // Palm
    (INDEX_FINGER_MCP, MIDDLE_FINGER_MCP),
    (MIDDLE_FINGER_MCP, RING_FINGER_MCP),
    (RING_FINGER_MCP, PINKY_MCP),
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::NUM_LANDMARKS;
    use std::collections::HashSet;

    #[test]
    fn connections_form_a_tree_plus_palm() {
        let mut touched = HashSet::new();
        for &(a, b) in &HAND_CONNECTIONS {
            assert!(a < NUM_LANDMARKS && b < NUM_LANDMARKS);
            assert_ne!(a, b);
            touched.insert(a);
            touched.insert(b);
        }
        assert_eq!(touched.len(), NUM_LANDMARKS);

        let unique: HashSet<_> = HAND_CONNECTIONS.iter().collect();
        assert_eq!(unique.len(), HAND_CONNECTIONS.len());
    }
}
