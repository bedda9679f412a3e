// Variable-arity value tuples.
//
// Immutable, shared by `Rc`, with O(1) `count`. Small tuples are stored
// inline; concatenations build a chain whose depth is capped at
// MAX_CHAIN_DEPTH, past which the tuple is flattened into a single array so
// `arg(i)` lookups stay near-constant instead of degrading quadratically.

use std::rc::Rc;

use crate::lua_value::LuaValue;

const MAX_CHAIN_DEPTH: u8 = 5;

#[derive(Clone, Debug, Default)]
pub enum Varargs {
    #[default]
    None,
    One(LuaValue),
    Pair(LuaValue, LuaValue),
    Array(Rc<[LuaValue]>),
    /// Array followed by more values (a prefix spliced onto a tail).
    ArrayTail(Rc<[LuaValue]>, Rc<Varargs>),
    /// Two tuples joined end to end.
    Chain {
        front: Rc<Varargs>,
        back: Rc<Varargs>,
        count: u32,
        depth: u8,
    },
    /// A view that drops the first `skip` values of `inner`.
    Suffix { inner: Rc<Varargs>, skip: u32 },
}

impl Varargs {
    pub fn from_slice(values: &[LuaValue]) -> Varargs {
        match values {
            [] => Varargs::None,
            [a] => Varargs::One(*a),
            [a, b] => Varargs::Pair(*a, *b),
            _ => Varargs::Array(Rc::from(values)),
        }
    }

    pub fn from_vec(values: Vec<LuaValue>) -> Varargs {
        match values.len() {
            0 => Varargs::None,
            1 => Varargs::One(values[0]),
            2 => Varargs::Pair(values[0], values[1]),
            _ => Varargs::Array(Rc::from(values)),
        }
    }

    /// Number of values. O(1) for every form.
    pub fn count(&self) -> u32 {
        match self {
            Varargs::None => 0,
            Varargs::One(_) => 1,
            Varargs::Pair(_, _) => 2,
            Varargs::Array(a) => a.len() as u32,
            Varargs::ArrayTail(a, tail) => a.len() as u32 + tail.count(),
            Varargs::Chain { count, .. } => *count,
            Varargs::Suffix { inner, skip } => inner.count().saturating_sub(*skip),
        }
    }

    /// The first value, or nil when empty. O(1).
    pub fn first(&self) -> LuaValue {
        match self {
            Varargs::None => LuaValue::Nil,
            Varargs::One(a) => *a,
            Varargs::Pair(a, _) => *a,
            Varargs::Array(a) => a.first().copied().unwrap_or(LuaValue::Nil),
            Varargs::ArrayTail(a, tail) => match a.first() {
                Some(v) => *v,
                None => tail.first(),
            },
            Varargs::Chain { front, back, .. } => {
                if front.count() > 0 {
                    front.first()
                } else {
                    back.first()
                }
            }
            Varargs::Suffix { inner, skip } => inner.arg(skip + 1),
        }
    }

    /// The `i`-th value, 1-indexed; out of range yields nil.
    pub fn arg(&self, i: u32) -> LuaValue {
        if i == 0 {
            return LuaValue::Nil;
        }
        match self {
            Varargs::None => LuaValue::Nil,
            Varargs::One(a) => {
                if i == 1 {
                    *a
                } else {
                    LuaValue::Nil
                }
            }
            Varargs::Pair(a, b) => match i {
                1 => *a,
                2 => *b,
                _ => LuaValue::Nil,
            },
            Varargs::Array(a) => a.get(i as usize - 1).copied().unwrap_or(LuaValue::Nil),
            Varargs::ArrayTail(a, tail) => {
                let n = a.len() as u32;
                if i <= n {
                    a[i as usize - 1]
                } else {
                    tail.arg(i - n)
                }
            }
            Varargs::Chain { front, back, .. } => {
                let n = front.count();
                if i <= n {
                    front.arg(i)
                } else {
                    back.arg(i - n)
                }
            }
            Varargs::Suffix { inner, skip } => inner.arg(i + skip),
        }
    }

    fn depth(&self) -> u8 {
        match self {
            Varargs::None | Varargs::One(_) | Varargs::Pair(_, _) | Varargs::Array(_) => 0,
            Varargs::ArrayTail(_, tail) => 1 + tail.depth(),
            Varargs::Chain { depth, .. } => *depth,
            Varargs::Suffix { inner, .. } => 1 + inner.depth(),
        }
    }

    /// Join two tuples. Flattens to a plain array once the chain would exceed
    /// the depth bound.
    pub fn append(self, other: Varargs) -> Varargs {
        match (&self, &other) {
            (Varargs::None, _) => return other,
            (_, Varargs::None) => return self,
            (Varargs::One(a), Varargs::One(b)) => return Varargs::Pair(*a, *b),
            _ => {}
        }
        let depth = 1 + self.depth().max(other.depth());
        if depth > MAX_CHAIN_DEPTH {
            let mut out = Vec::with_capacity((self.count() + other.count()) as usize);
            self.push_all(&mut out);
            other.push_all(&mut out);
            return Varargs::Array(Rc::from(out));
        }
        let count = self.count() + other.count();
        Varargs::Chain {
            front: Rc::new(self),
            back: Rc::new(other),
            count,
            depth,
        }
    }

    /// The tuple starting at the `i`-th value (1-indexed). `subargs(1)` is the
    /// whole tuple; past-the-end yields the empty tuple.
    pub fn subargs(&self, i: u32) -> Varargs {
        if i <= 1 {
            return self.clone();
        }
        let skip = i - 1;
        if skip >= self.count() {
            return Varargs::None;
        }
        match self {
            Varargs::Pair(_, b) if skip == 1 => Varargs::One(*b),
            // Collapse nested suffixes so views never stack.
            Varargs::Suffix { inner, skip: s0 } => Varargs::Suffix {
                inner: Rc::clone(inner),
                skip: s0 + skip,
            },
            _ => {
                let view = Varargs::Suffix {
                    inner: Rc::new(self.clone()),
                    skip,
                };
                if view.depth() > MAX_CHAIN_DEPTH {
                    Varargs::from_vec(view.to_vec())
                } else {
                    view
                }
            }
        }
    }

    pub fn push_all(&self, out: &mut Vec<LuaValue>) {
        match self {
            Varargs::None => {}
            Varargs::One(a) => out.push(*a),
            Varargs::Pair(a, b) => {
                out.push(*a);
                out.push(*b);
            }
            Varargs::Array(a) => out.extend_from_slice(a),
            Varargs::ArrayTail(a, tail) => {
                out.extend_from_slice(a);
                tail.push_all(out);
            }
            Varargs::Chain { front, back, .. } => {
                front.push_all(out);
                back.push_all(out);
            }
            Varargs::Suffix { inner, skip } => {
                let n = inner.count();
                for i in (*skip + 1)..=n {
                    out.push(inner.arg(i));
                }
            }
        }
    }

    pub fn to_vec(&self) -> Vec<LuaValue> {
        let mut out = Vec::with_capacity(self.count() as usize);
        self.push_all(&mut out);
        out
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(n: f64) -> LuaValue {
        LuaValue::Number(n)
    }

    #[test]
    fn arg_is_one_indexed_and_nil_padded() {
        let va = Varargs::from_slice(&[num(1.0), num(2.0), num(3.0)]);
        assert_eq!(va.count(), 3);
        assert_eq!(va.arg(1).as_number(), Some(1.0));
        assert_eq!(va.arg(3).as_number(), Some(3.0));
        assert!(va.arg(0).is_nil());
        assert!(va.arg(4).is_nil());
    }

    #[test]
    fn subargs_drops_prefix() {
        let va = Varargs::from_slice(&[num(1.0), num(2.0), num(3.0), num(4.0)]);
        let tail = va.subargs(3);
        assert_eq!(tail.count(), 2);
        assert_eq!(tail.first().as_number(), Some(3.0));
        assert_eq!(tail.arg(2).as_number(), Some(4.0));
        assert!(va.subargs(9).is_empty());
    }

    #[test]
    fn deep_chains_flatten() {
        let mut va = Varargs::One(num(0.0));
        for i in 1..20 {
            va = va.append(Varargs::One(num(i as f64)));
        }
        assert_eq!(va.count(), 20);
        // Depth bound kept: every element still reachable at its position.
        for i in 1..=20 {
            assert_eq!(va.arg(i).as_number(), Some((i - 1) as f64));
        }
        assert!(va.depth() <= MAX_CHAIN_DEPTH);
    }

    #[test]
    fn suffix_of_suffix_collapses() {
        let va = Varargs::from_slice(&[num(1.0), num(2.0), num(3.0), num(4.0), num(5.0)]);
        let s = va.subargs(2).subargs(2).subargs(2);
        assert_eq!(s.count(), 2);
        assert_eq!(s.first().as_number(), Some(4.0));
    }
}
