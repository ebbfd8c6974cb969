//! Ordered runs of IR values being consumed or produced.
//!
//! An explosion is the flat value list of one or more logical values.
//! Marshaling claims from the front and strips trailing parameters from
//! the back; running past either end is an internal consistency error.

use smallvec::SmallVec;

use relay_ir::VarId;

use crate::internal_error;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Explosion {
    values: SmallVec<[VarId; 8]>,
    next: usize,
}

impl Explosion {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, value: VarId) {
        self.values.push(value);
    }

    pub fn add_all(&mut self, values: impl IntoIterator<Item = VarId>) {
        self.values.extend(values);
    }

    /// Number of unclaimed values.
    pub fn size(&self) -> usize {
        self.values.len() - self.next
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn claim_next(&mut self) -> VarId {
        let Some(&value) = self.values.get(self.next) else {
            internal_error("claimed past the end of an explosion")
        };
        self.next += 1;
        value
    }

    pub fn claim(&mut self, n: usize) -> SmallVec<[VarId; 4]> {
        if n > self.size() {
            internal_error(format_args!(
                "claimed {n} values from an explosion of {}",
                self.size()
            ));
        }
        let out = SmallVec::from_slice(&self.values[self.next..self.next + n]);
        self.next += n;
        out
    }

    /// Remove the last unclaimed value.
    pub fn take_last(&mut self) -> VarId {
        if self.is_empty() {
            internal_error("took the last value of an empty explosion");
        }
        self.values
            .pop()
            .unwrap_or_else(|| internal_error("took the last value of an empty explosion"))
    }

    /// Move the next `n` values into `other`, unchanged.
    pub fn transfer_into(&mut self, other: &mut Explosion, n: usize) {
        other.add_all(self.claim(n));
    }

    pub fn claim_all(&mut self) -> SmallVec<[VarId; 4]> {
        self.claim(self.size())
    }

    pub fn as_slice(&self) -> &[VarId] {
        &self.values[self.next..]
    }
}

impl FromIterator<VarId> for Explosion {
    fn from_iter<I: IntoIterator<Item = VarId>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            next: 0,
        }
    }
}
