#![forbid(unsafe_code)]

use prism_ir::{Names, VName};

/// The effect of an already-checked subterm: the names it observed and
/// the names it consumed. Either side may be empty; the null occurrence
/// is never stored.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Occurrence {
    pub observed: Names,
    pub consumed: Names,
}

impl Occurrence {
    pub fn observation(observed: Names) -> Self {
        Occurrence {
            observed,
            consumed: Names::new(),
        }
    }

    pub fn consumption(consumed: Names) -> Self {
        Occurrence {
            observed: Names::new(),
            consumed,
        }
    }

    pub fn is_null(&self) -> bool {
        self.observed.is_empty() && self.consumed.is_empty()
    }
}

/// Everything consumed anywhere in the list.
pub fn all_consumed(occurrences: &[Occurrence]) -> Names {
    let mut names = Names::new();
    for occ in occurrences {
        names.extend_with(&occ.consumed);
    }
    names
}

/// Everything referenced, observed or consumed, anywhere in the list.
pub fn all_used(occurrences: &[Occurrence]) -> Names {
    let mut names = Names::new();
    for occ in occurrences {
        names.extend_with(&occ.observed);
        names.extend_with(&occ.consumed);
    }
    names
}

/// Sequential composition: `first` happens, then `then`. Observations
/// in `first` of names later consumed are redundant (the value no
/// longer exists to be observed) and are dropped.
pub fn seq_occurrences(first: Vec<Occurrence>, then: Vec<Occurrence>) -> Vec<Occurrence> {
    let post = all_consumed(&then);
    first
        .into_iter()
        .map(|occ| Occurrence {
            observed: occ.observed.minus(&post),
            consumed: occ.consumed,
        })
        .chain(then)
        .filter(|occ| !occ.is_null())
        .collect()
}

/// Alternative composition: either `first` or `then` happens. Both
/// sides' consumptions are visible afterwards, but observations and
/// consumptions from one arm do not survive the other arm's
/// consumption of the same value.
pub fn alt_occurrences(first: Vec<Occurrence>, then: Vec<Occurrence>) -> Vec<Occurrence> {
    let post = all_consumed(&then);
    first
        .into_iter()
        .map(|occ| Occurrence {
            observed: occ.observed.minus(&post),
            consumed: occ.consumed.minus(&post),
        })
        .chain(then)
        .filter(|occ| !occ.is_null())
        .collect()
}

/// Remove names going out of scope from every occurrence.
pub fn unoccur(names: &Names, occurrences: Vec<Occurrence>) -> Vec<Occurrence> {
    occurrences
        .into_iter()
        .map(|occ| Occurrence {
            observed: occ.observed.minus(names),
            consumed: occ.consumed.minus(names),
        })
        .filter(|occ| !occ.is_null())
        .collect()
}

/// The consumption log: a list of occurrences in control order, or the
/// terminal state naming the first variable referenced after being
/// consumed. The terminal state absorbs all further composition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Consumption {
    Error(VName),
    Occurrences(Vec<Occurrence>),
}

impl Default for Consumption {
    fn default() -> Self {
        Consumption::Occurrences(Vec::new())
    }
}

impl Consumption {
    pub fn from_occurrences(occurrences: Vec<Occurrence>) -> Self {
        Consumption::Occurrences(
            occurrences
                .into_iter()
                .filter(|occ| !occ.is_null())
                .collect(),
        )
    }

    /// Sequential composition with use-after-consume detection.
    pub fn seq(self, other: Consumption) -> Consumption {
        self.seq_checked(other, true)
    }

    /// Sequential composition. With `detect` off, violations are not
    /// looked for; the lists still compose.
    pub fn seq_checked(self, other: Consumption, detect: bool) -> Consumption {
        match (self, other) {
            (Consumption::Error(v), _) => Consumption::Error(v),
            (_, Consumption::Error(v)) => Consumption::Error(v),
            (Consumption::Occurrences(first), Consumption::Occurrences(then)) => {
                if detect {
                    let consumed = all_consumed(&first);
                    let used = all_used(&then);
                    if let Some(v) = consumed.first_common(&used) {
                        return Consumption::Error(v.clone());
                    }
                }
                Consumption::Occurrences(seq_occurrences(first, then))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(base: &str, tag: u32) -> VName {
        VName::new(base, tag)
    }

    fn obs(names: &[VName]) -> Occurrence {
        Occurrence::observation(names.iter().cloned().collect())
    }

    fn cons(names: &[VName]) -> Occurrence {
        Occurrence::consumption(names.iter().cloned().collect())
    }

    #[test]
    fn test_seq_identity() {
        let x = v("x", 0);
        let occs = vec![obs(&[x.clone()]), cons(&[x])];
        assert_eq!(seq_occurrences(vec![], occs.clone()), occs);
        assert_eq!(seq_occurrences(occs.clone(), vec![]), occs);
    }

    #[test]
    fn test_seq_drops_redundant_observations() {
        let x = v("x", 0);
        let composed = seq_occurrences(vec![obs(&[x.clone()])], vec![cons(&[x.clone()])]);
        // the observation became null and was dropped
        assert_eq!(composed, vec![cons(&[x])]);
    }

    #[test]
    fn test_seq_is_associative() {
        let x = v("x", 0);
        let y = v("y", 1);
        let z = v("z", 2);
        let a = vec![obs(&[x.clone(), y.clone()])];
        let b = vec![cons(&[y])];
        let c = vec![obs(&[z]), cons(&[x])];
        let left = seq_occurrences(seq_occurrences(a.clone(), b.clone()), c.clone());
        let right = seq_occurrences(a, seq_occurrences(b, c));
        assert_eq!(left, right);
    }

    #[test]
    fn test_alt_identity_up_to_null_dropping() {
        let x = v("x", 0);
        let occs = vec![obs(&[x.clone()]), cons(&[x])];
        assert_eq!(alt_occurrences(occs.clone(), vec![]), occs);
        assert_eq!(alt_occurrences(vec![], occs.clone()), occs);
    }

    #[test]
    fn test_alt_erases_one_arm_under_other_consumption() {
        let x = v("x", 0);
        let composed = alt_occurrences(vec![obs(&[x.clone()])], vec![cons(&[x.clone()])]);
        assert_eq!(composed, vec![cons(&[x])]);
    }

    #[test]
    fn test_unoccur_drops_out_of_scope_names() {
        let x = v("x", 0);
        let y = v("y", 1);
        let gone = Names::one(x.clone());
        let left = unoccur(&gone, vec![obs(&[x, y.clone()])]);
        assert_eq!(left, vec![obs(&[y])]);
    }

    #[test]
    fn test_consumption_detects_use_after_consume() {
        let x = v("x", 0);
        let first = Consumption::from_occurrences(vec![cons(&[x.clone()])]);
        let then = Consumption::from_occurrences(vec![obs(&[x.clone()])]);
        assert_eq!(first.seq(then), Consumption::Error(x));
    }

    #[test]
    fn test_consumption_error_absorbs() {
        let x = v("x", 0);
        let y = v("y", 1);
        let err = Consumption::Error(x.clone());
        let more = Consumption::from_occurrences(vec![obs(&[y])]);
        assert_eq!(err.clone().seq(more.clone()), Consumption::Error(x.clone()));
        assert_eq!(more.seq(err), Consumption::Error(x));
    }

    #[test]
    fn test_detection_can_be_disabled() {
        let x = v("x", 0);
        let first = Consumption::from_occurrences(vec![cons(&[x.clone()])]);
        let then = Consumption::from_occurrences(vec![obs(&[x])]);
        match first.seq_checked(then, false) {
            Consumption::Occurrences(_) => {}
            Consumption::Error(v) => panic!("unexpected error on {v}"),
        }
    }
}
