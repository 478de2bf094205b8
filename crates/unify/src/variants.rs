//! In-source variant collapsing.
//!
//! Records whose names reduce to the same base (after stripping trailing
//! colour / size / edition / running-index suffixes) are folded into the first
//! record of the group, but only when the group reaches the variant threshold.
//! Smaller groups stay distinct products.

use std::collections::HashMap;

use regex::Regex;

use crate::error::UnifyError;
use crate::normalize::tokenize;

/// Upper bound on suffix strips per name ("Widget - Red - XL - (2)").
const MAX_STRIPS: usize = 8;

/// Compile one suffix fragment into a trailing, separator-delimited matcher.
pub fn compile_suffix(collection: &str, fragment: &str) -> Result<Regex, UnifyError> {
    let pattern = format!(r"(?i)[\s\-_/,|:;]+(?:{fragment})[\s\)\]\.]*$");
    Regex::new(&pattern).map_err(|e| UnifyError::InvalidPattern {
        collection: collection.into(),
        pattern: fragment.into(),
        message: e.to_string(),
    })
}

/// One output group: the representative plus the siblings folded into it.
#[derive(Debug, Clone, PartialEq)]
pub struct VariantGroup<T> {
    pub representative: T,
    pub variants: Vec<T>,
}

impl<T> VariantGroup<T> {
    pub fn single(representative: T) -> Self {
        Self {
            representative,
            variants: Vec::new(),
        }
    }

    /// Members including the representative.
    pub fn len(&self) -> usize {
        1 + self.variants.len()
    }
}

#[derive(Debug, Clone)]
pub struct VariantCollapser {
    suffixes: Vec<Regex>,
    threshold: usize,
}

impl VariantCollapser {
    pub fn new<S: AsRef<str>>(
        collection: &str,
        fragments: &[S],
        threshold: usize,
    ) -> Result<Self, UnifyError> {
        let suffixes = fragments
            .iter()
            .map(|f| compile_suffix(collection, f.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            suffixes,
            threshold,
        })
    }

    /// Base model string: suffixes stripped from the end, then tokenized and
    /// rejoined. Never strips a name down to nothing.
    pub fn base_name(&self, display_name: &str) -> String {
        let mut current = display_name.trim().to_string();
        for _ in 0..MAX_STRIPS {
            let stripped = self.suffixes.iter().find_map(|re| {
                re.find(&current)
                    .map(|m| current[..m.start()].trim_end().to_string())
                    .filter(|rest| !tokenize(rest).is_empty())
            });
            match stripped {
                Some(rest) => current = rest,
                None => break,
            }
        }
        tokenize(&current).join(" ")
    }

    /// Group one source's records. Output preserves input order; a collapsed
    /// group sits where its first member was.
    pub fn collapse<T, F>(&self, records: Vec<T>, name_of: F) -> Vec<VariantGroup<T>>
    where
        F: Fn(&T) -> &str,
    {
        let bases: Vec<String> = records.iter().map(|r| self.base_name(name_of(r))).collect();

        let mut sizes: HashMap<&str, usize> = HashMap::new();
        for base in &bases {
            *sizes.entry(base.as_str()).or_insert(0) += 1;
        }

        let mut out: Vec<VariantGroup<T>> = Vec::with_capacity(records.len());
        // base -> index in `out` of that base's representative
        let mut representative_at: HashMap<&str, usize> = HashMap::new();

        for (record, base) in records.into_iter().zip(bases.iter()) {
            let collapsible = sizes.get(base.as_str()).copied().unwrap_or(0) >= self.threshold;
            if !collapsible {
                out.push(VariantGroup::single(record));
                continue;
            }
            match representative_at.get(base.as_str()) {
                Some(&idx) => out[idx].variants.push(record),
                None => {
                    representative_at.insert(base.as_str(), out.len());
                    out.push(VariantGroup::single(record));
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_variant_suffixes;

    fn collapser(threshold: usize) -> VariantCollapser {
        VariantCollapser::new("test", &default_variant_suffixes(), threshold).unwrap()
    }

    const COLOURS: [&str; 6] = [
        "Widget - Red",
        "Widget - Blue",
        "Widget - Green",
        "Widget - White",
        "Widget - Yellow",
        "Widget - Black",
    ];

    #[test]
    fn base_name_strips_suffixes() {
        let c = collapser(5);
        assert_eq!(c.base_name("Widget - Red"), "widget");
        assert_eq!(c.base_name("Widget (2)"), "widget");
        assert_eq!(c.base_name("Widget #12"), "widget");
        assert_eq!(c.base_name("Katana 50 - Black - Limited Edition"), "katana 50");
        assert_eq!(c.base_name("Blues Cube Hot V2"), "blues cube hot");
        assert_eq!(c.base_name("Stratocaster Sunburst"), "stratocaster");
    }

    #[test]
    fn base_name_keeps_model_numbers() {
        let c = collapser(5);
        assert_eq!(c.base_name("FP-30X"), "fp 30 x");
        assert_eq!(c.base_name("JC-120"), "jc 120");
        // a name that is only a suffix word is left alone
        assert_eq!(c.base_name("Red"), "red");
        assert_eq!(c.base_name("Credit Card Reader"), "credit card reader");
    }

    #[test]
    fn six_colours_collapse_to_one() {
        let groups = collapser(5).collapse(COLOURS.to_vec(), |n| *n);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].representative, "Widget - Red");
        assert_eq!(groups[0].variants.len(), 5);
        assert_eq!(groups[0].variants[4], "Widget - Black");
    }

    #[test]
    fn below_threshold_stays_distinct() {
        let groups = collapser(5).collapse(COLOURS[..4].to_vec(), |n| *n);
        assert_eq!(groups.len(), 4);
        assert!(groups.iter().all(|g| g.variants.is_empty()));
    }

    #[test]
    fn order_preserved_around_collapsed_group() {
        let mut names = vec!["Alpha One"];
        names.extend(COLOURS[..3].iter().copied());
        names.push("Beta Two");
        names.extend(COLOURS[3..].iter().copied());
        let groups = collapser(5).collapse(names, |n| *n);
        let reps: Vec<&str> = groups.iter().map(|g| g.representative).collect();
        assert_eq!(reps, vec!["Alpha One", "Widget - Red", "Beta Two"]);
        assert_eq!(groups[1].len(), 6);
    }

    #[test]
    fn collapsing_twice_is_a_no_op() {
        let c = collapser(5);
        let mut names: Vec<&str> = COLOURS.to_vec();
        names.extend(["Gizmo", "Gizmo - Red", "Other Thing"]);
        let first = c.collapse(names, |n| *n);
        let reps: Vec<&str> = first.iter().map(|g| g.representative).collect();
        let second = c.collapse(reps.clone(), |n| *n);
        let again: Vec<&str> = second.iter().map(|g| g.representative).collect();
        assert_eq!(reps, again);
        assert!(second.iter().all(|g| g.variants.is_empty()));
    }

    #[test]
    fn collection_specific_suffix() {
        let mut fragments = default_variant_suffixes();
        fragments.push("(?:left|right)[\\s-]*handed".into());
        let c = VariantCollapser::new("guitars", &fragments, 2).unwrap();
        assert_eq!(c.base_name("Player Strat - Left Handed"), "player strat");
    }

    #[test]
    fn invalid_fragment_reports_collection() {
        let err = VariantCollapser::new("boss", &["(open"], 5).unwrap_err();
        assert!(err.to_string().contains("boss"));
    }
}
