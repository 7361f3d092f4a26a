//! State representation and fingerprinting.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use strider_model::Value;

/// A fingerprint is a 64-bit hash identifying a state.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(u64);

impl Fingerprint {
    #[inline]
    pub fn as_u64(self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_u64(v: u64) -> Self {
        Fingerprint(v)
    }
}

impl fmt::Debug for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fingerprint({:016x})", self.0)
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Hash a single global slot at a given position.
/// Splitmix64-style mixing fast path for Int/Bool (the dominant types);
/// AHash fallback for composite values.
#[inline]
fn hash_slot(idx: usize, val: &Value) -> u64 {
    match val {
        Value::Int(n) => mix_scalar(idx as u64, *n as u64),
        Value::Bool(b) => mix_scalar(idx as u64, *b as u64),
        _ => {
            let mut hasher = ahash::AHasher::default();
            idx.hash(&mut hasher);
            val.hash(&mut hasher);
            hasher.finish()
        }
    }
}

#[inline]
fn mix_scalar(idx: u64, payload: u64) -> u64 {
    let h = (idx ^ 0x2d358dccaa6c78a5).wrapping_mul(0x9e3779b97f4a7c15);
    let h = (h ^ payload).wrapping_mul(0x517cc1b727220a95);
    h ^ (h >> 32)
}

/// The execution state of one machine: its template, control location,
/// and local bindings. The derived `Ord` defines the canonical order
/// used for dynamically spawned machines.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MachineState {
    pub template: usize,
    pub pc: usize,
    pub locals: Vec<Value>,
}

fn hash_machine(idx: usize, m: &MachineState) -> u64 {
    let mut hasher = ahash::AHasher::default();
    idx.hash(&mut hasher);
    m.hash(&mut hasher);
    hasher.finish()
}

/// fp = XOR over global slots and machine slots. Decomposable, so any
/// single-slot difference flips the fingerprint.
fn compute_fingerprint(globals: &[Value], machines: &[MachineState]) -> Fingerprint {
    let mut h: u64 = 0;
    for (i, v) in globals.iter().enumerate() {
        h ^= hash_slot(i, v);
    }
    for (i, m) in machines.iter().enumerate() {
        h ^= hash_machine(globals.len() + i, m);
    }
    Fingerprint(h)
}

/// An immutable snapshot of the model's full execution state: global
/// bindings plus the ordered machine states. Uses Arc for cheap cloning;
/// the fingerprint is cached at construction.
///
/// Construction canonicalizes: machines past the static prefix (those
/// created by spawn) are sorted by (template, pc, locals), so two states
/// that differ only in spawn interleaving order compare equal. This is
/// sound because machine indices are not first-class values — commands
/// reference only globals and their own locals/pc.
#[derive(Debug, Clone)]
pub struct State {
    globals: Arc<Vec<Value>>,
    machines: Arc<Vec<MachineState>>,
    static_count: usize,
    fp: Fingerprint,
}

impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        self.fp == other.fp && self.globals == other.globals && self.machines == other.machines
    }
}

impl Eq for State {}

impl Hash for State {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fp.hash(state);
    }
}

impl State {
    /// Build a state, canonicalizing the dynamic machine suffix.
    pub fn new(globals: Vec<Value>, mut machines: Vec<MachineState>, static_count: usize) -> Self {
        debug_assert!(static_count <= machines.len());
        machines[static_count..].sort();
        let fp = compute_fingerprint(&globals, &machines);
        Self {
            globals: Arc::new(globals),
            machines: Arc::new(machines),
            static_count,
            fp,
        }
    }

    #[inline]
    pub fn fingerprint(&self) -> Fingerprint {
        self.fp
    }

    #[inline]
    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    #[inline]
    pub fn machines(&self) -> &[MachineState] {
        &self.machines
    }

    /// Number of statically declared machines; the canonical sort never
    /// touches indices below this.
    #[inline]
    pub fn static_count(&self) -> usize {
        self.static_count
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, v) in self.globals.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", v)?;
        }
        write!(f, "]")?;
        for m in self.machines.iter() {
            write!(f, " t{}@{}", m.template, m.pc)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine(template: usize, pc: usize, locals: Vec<Value>) -> MachineState {
        MachineState {
            template,
            pc,
            locals,
        }
    }

    #[test]
    fn test_fingerprint_equality() {
        let s1 = State::new(vec![Value::Int(1), Value::Int(2)], vec![], 0);
        let s2 = State::new(vec![Value::Int(1), Value::Int(2)], vec![], 0);
        let s3 = State::new(vec![Value::Int(1), Value::Int(3)], vec![], 0);

        assert_eq!(s1.fingerprint(), s2.fingerprint());
        assert_eq!(s1, s2);
        assert_ne!(s1.fingerprint(), s3.fingerprint());
        assert_ne!(s1, s3);
    }

    #[test]
    fn test_pc_distinguishes_states() {
        let s1 = State::new(vec![], vec![machine(0, 0, vec![])], 1);
        let s2 = State::new(vec![], vec![machine(0, 1, vec![])], 1);
        assert_ne!(s1, s2);
        assert_ne!(s1.fingerprint(), s2.fingerprint());
    }

    #[test]
    fn test_spawn_order_canonicalized() {
        // One static machine, two spawned: construction order must not matter.
        let a = machine(1, 2, vec![Value::Int(7)]);
        let b = machine(1, 0, vec![Value::Int(9)]);
        let root = machine(0, 1, vec![]);

        let s1 = State::new(vec![], vec![root.clone(), a.clone(), b.clone()], 1);
        let s2 = State::new(vec![], vec![root, b, a], 1);
        assert_eq!(s1, s2);
        assert_eq!(s1.fingerprint(), s2.fingerprint());
    }

    #[test]
    fn test_static_prefix_not_reordered() {
        // Two static machines in different orders are different states.
        let a = machine(0, 0, vec![]);
        let b = machine(0, 1, vec![]);
        let s1 = State::new(vec![], vec![a.clone(), b.clone()], 2);
        let s2 = State::new(vec![], vec![b, a], 2);
        assert_ne!(s1, s2);
    }

    #[test]
    fn test_composite_values_hashed() {
        let s1 = State::new(vec![Value::seq(vec![Value::Int(1)])], vec![], 0);
        let s2 = State::new(vec![Value::seq(vec![Value::Int(2)])], vec![], 0);
        assert_ne!(s1.fingerprint(), s2.fingerprint());
    }
}
