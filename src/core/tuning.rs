use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{Result, TessellaError};

/// Domain of a single tunable parameter.
#[derive(Debug, Clone)]
pub enum ParamKind {
    /// Inclusive range walked in `step` increments.
    Range { min: i64, max: i64, step: i64 },
    /// Explicit candidate values.
    Set { values: Vec<i64> },
    /// 0/1 flag. A fixed flag keeps its default; a free one may be searched.
    Boolean { fixed: bool },
}

#[derive(Debug, Clone)]
pub struct TunableParam {
    pub name: String,
    pub kind: ParamKind,
    pub default: i64,
    current: i64,
}

impl TunableParam {
    pub fn current(&self) -> i64 {
        self.current
    }

    pub fn in_domain(&self, value: i64) -> bool {
        match &self.kind {
            ParamKind::Range { min, max, step } => {
                value >= *min && value <= *max && (value - min) % step == 0
            }
            ParamKind::Set { values } => values.contains(&value),
            ParamKind::Boolean { .. } => value == 0 || value == 1,
        }
    }
}

type ConstraintFn = dyn Fn(&[i64]) -> bool + Send + Sync;

/// Predicate over an ordered list of parameter values. `owned` is the subset
/// of the referenced names a search walks when repairing a violation; the
/// predicate itself must hold for every valid configuration regardless.
pub struct Constraint {
    pub params: Vec<String>,
    pub owned: Vec<String>,
    predicate: Box<ConstraintFn>,
}

impl Constraint {
    pub fn evaluate(&self, values: &[i64]) -> bool {
        (self.predicate)(values)
    }
}

impl fmt::Debug for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Constraint")
            .field("params", &self.params)
            .field("owned", &self.owned)
            .finish()
    }
}

/// Declarations plus one concrete assignment.
///
/// Parameters start at their defaults; `set_param` moves a value within its
/// declared domain and `validate` checks the cross-parameter constraints on
/// the current assignment.
#[derive(Debug, Default)]
pub struct TuningSpace {
    params: Vec<TunableParam>,
    index: HashMap<String, usize>,
    constraints: Vec<Constraint>,
}

impl TuningSpace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_range_param(
        &mut self,
        name: &str,
        default: i64,
        min: i64,
        max: i64,
        step: i64,
    ) -> Result<()> {
        self.insert(TunableParam {
            name: name.to_string(),
            kind: ParamKind::Range { min, max, step },
            default,
            current: default,
        })
    }

    pub fn add_set_param(&mut self, name: &str, default: i64, values: Vec<i64>) -> Result<()> {
        self.insert(TunableParam {
            name: name.to_string(),
            kind: ParamKind::Set { values },
            default,
            current: default,
        })
    }

    pub fn add_boolean_param(&mut self, name: &str, default: bool, fixed: bool) -> Result<()> {
        self.insert(TunableParam {
            name: name.to_string(),
            kind: ParamKind::Boolean { fixed },
            default: default as i64,
            current: default as i64,
        })
    }

    /// Register a predicate over `params` (in the order the predicate reads
    /// them). Every referenced name must already be declared, and `owned`
    /// must be a subset of `params`.
    pub fn add_constraint<F>(&mut self, params: &[&str], owned: &[&str], predicate: F) -> Result<()>
    where
        F: Fn(&[i64]) -> bool + Send + Sync + 'static,
    {
        for name in params {
            if !self.index.contains_key(*name) {
                return Err(TessellaError::UnknownParameter(name.to_string()));
            }
        }
        for name in owned {
            if !params.contains(name) {
                return Err(TessellaError::UnknownParameter(name.to_string()));
            }
        }
        self.constraints.push(Constraint {
            params: params.iter().map(|s| s.to_string()).collect(),
            owned: owned.iter().map(|s| s.to_string()).collect(),
            predicate: Box::new(predicate),
        });
        Ok(())
    }

    pub fn get_param(&self, name: &str) -> Result<i64> {
        self.lookup(name).map(|p| p.current)
    }

    pub fn get_bool(&self, name: &str) -> Result<bool> {
        self.lookup(name).map(|p| p.current != 0)
    }

    /// Whether a flag was declared fixed. Ranged and set parameters are
    /// always free.
    pub fn is_fixed(&self, name: &str) -> Result<bool> {
        self.lookup(name)
            .map(|p| matches!(p.kind, ParamKind::Boolean { fixed: true }))
    }

    pub fn set_param(&mut self, name: &str, value: i64) -> Result<()> {
        let idx = *self
            .index
            .get(name)
            .ok_or_else(|| TessellaError::UnknownParameter(name.to_string()))?;
        let param = &mut self.params[idx];
        if !param.in_domain(value) {
            return Err(TessellaError::InvalidDomain {
                param: name.to_string(),
                value,
            });
        }
        // A fixed flag is pinned to its default.
        if matches!(param.kind, ParamKind::Boolean { fixed: true }) && value != param.default {
            return Err(TessellaError::InvalidDomain {
                param: name.to_string(),
                value,
            });
        }
        param.current = value;
        Ok(())
    }

    /// True iff every declared constraint holds for the current assignment.
    pub fn validate(&self) -> bool {
        self.constraints.iter().all(|c| self.holds(c))
    }

    pub fn holds(&self, constraint: &Constraint) -> bool {
        let values: Vec<i64> = constraint
            .params
            .iter()
            .map(|name| self.get_param(name).unwrap_or(0))
            .collect();
        constraint.evaluate(&values)
    }

    pub fn params(&self) -> &[TunableParam] {
        &self.params
    }

    pub fn constraints(&self) -> &[Constraint] {
        &self.constraints
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Current assignment as a name-sorted map, suitable for persistence.
    pub fn assignment(&self) -> BTreeMap<String, i64> {
        self.params
            .iter()
            .map(|p| (p.name.clone(), p.current))
            .collect()
    }

    /// Replay a stored assignment. Unknown names and out-of-domain values are
    /// rejected without partially applying the rest.
    pub fn apply_assignment(&mut self, assignment: &BTreeMap<String, i64>) -> Result<()> {
        for (name, value) in assignment {
            let param = self.lookup(name)?;
            let pinned = matches!(param.kind, ParamKind::Boolean { fixed: true })
                && *value != param.default;
            if !param.in_domain(*value) || pinned {
                return Err(TessellaError::InvalidDomain {
                    param: name.clone(),
                    value: *value,
                });
            }
        }
        for (name, value) in assignment {
            self.set_param(name, *value)?;
        }
        Ok(())
    }

    fn insert(&mut self, param: TunableParam) -> Result<()> {
        if self.index.contains_key(&param.name) {
            return Err(TessellaError::DuplicateParameter(param.name));
        }
        if !param.in_domain(param.default) {
            return Err(TessellaError::InvalidDomain {
                param: param.name,
                value: param.default,
            });
        }
        self.index.insert(param.name.clone(), self.params.len());
        self.params.push(param);
        Ok(())
    }

    fn lookup(&self, name: &str) -> Result<&TunableParam> {
        self.index
            .get(name)
            .map(|&idx| &self.params[idx])
            .ok_or_else(|| TessellaError::UnknownParameter(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_the_initial_assignment() {
        let mut space = TuningSpace::new();
        space.add_range_param("TSK", 8, 1, 32, 1).unwrap();
        space.add_set_param("VWM", 4, vec![1, 2, 4, 8, 16]).unwrap();
        space.add_boolean_param("vector_unroll", true, false).unwrap();
        assert_eq!(space.get_param("TSK").unwrap(), 8);
        assert_eq!(space.get_param("VWM").unwrap(), 4);
        assert!(space.get_bool("vector_unroll").unwrap());
    }

    #[test]
    fn range_step_is_enforced() {
        let mut space = TuningSpace::new();
        space.add_range_param("WPTM", 4, 4, 16, 4).unwrap();
        assert!(space.set_param("WPTM", 6).is_err());
        space.set_param("WPTM", 12).unwrap();
        assert_eq!(space.get_param("WPTM").unwrap(), 12);
    }

    #[test]
    fn apply_assignment_is_all_or_nothing() {
        let mut space = TuningSpace::new();
        space.add_range_param("TSK", 8, 1, 32, 1).unwrap();
        space.add_range_param("WPTM", 4, 4, 16, 4).unwrap();
        let mut stored = BTreeMap::new();
        stored.insert("TSK".to_string(), 16);
        stored.insert("WPTM".to_string(), 5);
        assert!(space.apply_assignment(&stored).is_err());
        assert_eq!(space.get_param("TSK").unwrap(), 8);
    }
}
