//! FSRS scheduler math
//!
//! Reduced FSRS model: stability S (days), difficulty D in [1, 10], and
//! power-law retrievability. The power law decays slower than an exponential,
//! which matches observed long-tail recall.
//!
//! Core formula: `R(S, t) = (1 + FACTOR * t / S) ^ DECAY`
//!
//! Reference: https://github.com/open-spaced-repetition/fsrs4anki

// ============================================================================
// CONSTANTS
// ============================================================================

/// Forgetting-curve factor, chosen so R(S, S) = 0.9.
pub const FSRS_FACTOR: f64 = 19.0 / 81.0;

/// Power-law decay exponent.
pub const FSRS_DECAY: f64 = -0.5;

/// Stability assigned to new memories (days).
pub const DEFAULT_STABILITY: f64 = 1.0;

/// Difficulty assigned to new memories.
pub const DEFAULT_DIFFICULTY: f64 = 5.0;

/// Stability floor; writes clamp here.
pub const MIN_STABILITY: f64 = 0.1;

/// Stability ceiling (one year).
pub const MAX_STABILITY: f64 = 365.0;

pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Extra stability multiplier on low-retrievability successful recalls
/// (desirable difficulty).
pub const DESIRABLE_DIFFICULTY_BONUS: f64 = 0.5;

// ============================================================================
// GRADES
// ============================================================================

/// Review outcome grade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grade {
    /// Failed recall
    Again = 1,
    /// Recalled with serious effort
    Hard = 2,
    /// Recalled correctly
    Good = 3,
    /// Recalled instantly
    Easy = 4,
}

impl Grade {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Grade::Again),
            2 => Some(Grade::Hard),
            3 => Some(Grade::Good),
            4 => Some(Grade::Easy),
            _ => None,
        }
    }
}

// ============================================================================
// CORE FORMULAS
// ============================================================================

/// Probability of successful recall after `elapsed_days`.
///
/// Clamped to (0, 1]. Non-positive elapsed time returns 1.0; a non-finite or
/// non-positive stability falls back to [`DEFAULT_STABILITY`].
pub fn retrievability(stability: f64, elapsed_days: f64) -> f64 {
    if elapsed_days <= 0.0 || !elapsed_days.is_finite() {
        return 1.0;
    }
    let s = if stability.is_finite() && stability > 0.0 {
        stability
    } else {
        DEFAULT_STABILITY
    };

    let r = (1.0 + FSRS_FACTOR * elapsed_days / s).powf(FSRS_DECAY);
    r.clamp(f64::MIN_POSITIVE, 1.0)
}

/// Next stability after a review at retrievability `r` with the given grade.
///
/// `Again` strictly decreases stability, more so for difficult memories.
/// Successful grades increase it, with a larger gain when `r` was low
/// (the retrieval was a desirable difficulty). Result clamps to
/// [[`MIN_STABILITY`], [`MAX_STABILITY`]].
pub fn update_stability(stability: f64, difficulty: f64, r: f64, grade: Grade) -> f64 {
    let s = if stability.is_finite() && stability > 0.0 {
        stability
    } else {
        DEFAULT_STABILITY
    };
    let d = clamp_difficulty(difficulty);
    let r = if r.is_finite() && r > 0.0 && r <= 1.0 { r } else { 0.9 };

    let next = match grade {
        Grade::Again => {
            // Harder memories lose proportionally more on a lapse.
            let factor = 0.5 - 0.025 * (d - MIN_DIFFICULTY);
            s * factor
        }
        Grade::Hard | Grade::Good | Grade::Easy => {
            let grade_weight = (grade as i64 - 1) as f64 * 0.5;
            let desirable = 1.0 + (1.0 - r) * 1.5;
            let ease = (MAX_DIFFICULTY + 1.0 - d) / 10.0;
            s * (1.0 + grade_weight * desirable * ease)
        }
    };

    next.clamp(MIN_STABILITY, MAX_STABILITY)
}

/// Next difficulty after a review. Grades 1..=4 shift difficulty by a
/// monotonically non-increasing amount; clamped to [1, 10].
pub fn update_difficulty(difficulty: f64, grade: Grade) -> f64 {
    let d = clamp_difficulty(difficulty);
    let shift = (2.5 - grade as i64 as f64) * 0.8;
    (d + shift).clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

/// Days for retrievability to decay from 1.0 down to `r_target`.
///
/// Strictly increases with stability and as the target drops.
pub fn optimal_interval(stability: f64, r_target: f64) -> f64 {
    let s = if stability.is_finite() && stability > 0.0 {
        stability
    } else {
        DEFAULT_STABILITY
    };
    let r = if r_target.is_finite() && r_target > 0.0 && r_target < 1.0 {
        r_target
    } else {
        0.9
    };

    s / FSRS_FACTOR * (r.powf(1.0 / FSRS_DECAY) - 1.0)
}

/// Testing-effect stability after a retrieval hit.
///
/// A successful access is treated as a `Good` review, then boosted by up to
/// 50% when the memory was nearly forgotten (R below 0.9).
pub fn access_stability(stability: f64, difficulty: f64, r: f64) -> f64 {
    let r = if r.is_finite() && r > 0.0 && r <= 1.0 { r } else { 0.9 };
    let reviewed = update_stability(stability, difficulty, r, Grade::Good);
    let bonus = 1.0 + (0.9 - r).max(0.0) * DESIRABLE_DIFFICULTY_BONUS;
    (reviewed * bonus).clamp(MIN_STABILITY, MAX_STABILITY)
}

fn clamp_difficulty(d: f64) -> f64 {
    if d.is_finite() {
        d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
    } else {
        DEFAULT_DIFFICULTY
    }
}

// ============================================================================
// TESTS
// ============================================================================
