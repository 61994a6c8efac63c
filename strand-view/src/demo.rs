//! Built-in skeleton shown when no files are given on the command line.
//!
//! Points are written `(x z y)`, so the third number is height.

use strand_core::{error::FormatError, skeleton::Skeleton};

pub const DEMO_SHOOT: &str = "\
(0 0 0) (0 0 0.35)
[ (0.18 0.08 0.55) (0.3 0.12 0.72) ]
[ (-0.2 -0.06 0.6) ]
(0.02 0 0.8) (0 0.04 1.0)";

pub const DEMO_ROOT: &str = "\
(0 0 0) (0 0 -0.3)
[ (0.25 0.05 -0.5) (0.45 0.1 -0.65) ]
[ (-0.2 -0.05 -0.55) (-0.35 0.05 -0.8) ]
(0.05 0 -0.7)
[ (0.2 -0.15 -0.9) ]
(0 0.05 -1.1)";

pub fn demo_skeleton() -> Result<Skeleton, FormatError> {
    Skeleton::parse(DEMO_SHOOT, DEMO_ROOT)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_skeleton_parses() {
        let skeleton = demo_skeleton().unwrap();
        assert_eq!(skeleton.shoot.leaves().len(), 3);
        assert_eq!(skeleton.root.leaves().len(), 4);
        // The root grows downward.
        assert!(skeleton.root.stats().max.y <= 0.0);
    }
}
