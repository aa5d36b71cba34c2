//! Array operations
//!
//! An array block has the `is-array` bit set and its header kind is the
//! *element* kind; length is payload bytes over the element cell width.
//! Reference-kind elements are 4-byte pointers with -1 as the empty slot.
//!
//! Operations that change shape allocate a fresh block and leave the old
//! one to the collector; element writes mutate in place. Higher-order
//! operations take callbacks so the evaluator can run interpreted
//! lambdas through them.

use crate::arith;
use crate::coerce;
use crate::strings::resolve_index;
use crate::value::Value;
use sable_core::arena::{HeapPtr, NULL_PTR};
use sable_core::error::{ErrorKind, RunResult, err};
use sable_core::kind::Kind;
use sable_core::memory::Memory;
use sable_core::trace::cell_size;
use std::cmp::Ordering;

/// Callback evaluating a per-element mapping (the evaluator wires
/// interpreted lambdas in through this shape).
pub type MapFn<'a> = dyn FnMut(&mut Memory, Value) -> RunResult<Value> + 'a;

/// Callback evaluating a per-element predicate.
pub type PredFn<'a> = dyn FnMut(&mut Memory, Value) -> RunResult<bool> + 'a;

pub fn elem_kind(mem: &Memory, ptr: HeapPtr) -> RunResult<Kind> {
    let info = mem.arena.block_info(ptr)?;
    if !info.is_array {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("block at {ptr} is not an array"),
        ));
    }
    Ok(info.kind)
}

pub fn len(mem: &Memory, ptr: HeapPtr) -> RunResult<usize> {
    let kind = elem_kind(mem, ptr)?;
    Ok(mem.arena.payload_len(ptr)? / cell_size(kind))
}

/// Allocate an array of `length` elements, empty reference slots set
/// to -1.
pub fn alloc_array(mem: &mut Memory, elem: Kind, length: usize) -> RunResult<HeapPtr> {
    let cell = cell_size(elem);
    let ptr = mem.alloc(length * cell, elem, true)?;
    if elem.is_reference() {
        for i in 0..length {
            mem.arena.write_i32(ptr as usize + i * 4, NULL_PTR)?;
        }
    }
    Ok(ptr)
}

/// Build an array from values, casting each to the element kind.
pub fn from_values(mem: &mut Memory, elem: Kind, items: &[Value]) -> RunResult<HeapPtr> {
    let ptr = alloc_array(mem, elem, items.len())?;
    let cell = cell_size(elem);
    for (i, item) in items.iter().enumerate() {
        let v = coerce::cast(mem, *item, elem)?;
        v.write_cell(mem, ptr as usize + i * cell, elem)?;
    }
    Ok(ptr)
}

pub fn get(mem: &Memory, ptr: HeapPtr, index: i64, from_end: bool) -> RunResult<Value> {
    let kind = elem_kind(mem, ptr)?;
    let idx = resolve_index(index, from_end, len(mem, ptr)?)?;
    Value::read_cell(mem, ptr as usize + idx * cell_size(kind), kind)
}

pub fn set(mem: &mut Memory, ptr: HeapPtr, index: i64, from_end: bool, v: Value) -> RunResult<()> {
    let kind = elem_kind(mem, ptr)?;
    let idx = resolve_index(index, from_end, len(mem, ptr)?)?;
    let v = coerce::cast(mem, v, kind)?;
    v.write_cell(mem, ptr as usize + idx * cell_size(kind), kind)
}

pub fn to_values(mem: &Memory, ptr: HeapPtr) -> RunResult<Vec<Value>> {
    let kind = elem_kind(mem, ptr)?;
    let n = len(mem, ptr)?;
    let cell = cell_size(kind);
    let mut out = Vec::with_capacity(n);
    for i in 0..n {
        out.push(Value::read_cell(mem, ptr as usize + i * cell, kind)?);
    }
    Ok(out)
}

/// Grow or shrink to `new_len`, preserving a prefix; fresh block.
pub fn resize(mem: &mut Memory, ptr: HeapPtr, new_len: usize) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let old = to_values(mem, ptr)?;
    let fresh = alloc_array(mem, kind, new_len)?;
    let cell = cell_size(kind);
    for (i, v) in old.into_iter().take(new_len).enumerate() {
        v.write_cell(mem, fresh as usize + i * cell, kind)?;
    }
    Ok(fresh)
}

pub fn add(mem: &mut Memory, ptr: HeapPtr, v: Value) -> RunResult<HeapPtr> {
    let n = len(mem, ptr)?;
    add_at(mem, ptr, n as i64, v)
}

pub fn add_at(mem: &mut Memory, ptr: HeapPtr, index: i64, v: Value) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let mut items = to_values(mem, ptr)?;
    if index < 0 || index as usize > items.len() {
        return Err(out_of_range(index, items.len()));
    }
    let v = coerce::cast(mem, v, kind)?;
    items.insert(index as usize, v);
    from_values(mem, kind, &items)
}

pub fn remove_at(mem: &mut Memory, ptr: HeapPtr, index: i64) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let mut items = to_values(mem, ptr)?;
    if index < 0 || index as usize >= items.len() {
        return Err(out_of_range(index, items.len()));
    }
    items.remove(index as usize);
    from_values(mem, kind, &items)
}

/// First index holding a value equal to `v`, else -1.
pub fn index_of(mem: &Memory, ptr: HeapPtr, v: Value) -> RunResult<i64> {
    for (i, item) in to_values(mem, ptr)?.into_iter().enumerate() {
        if arith::equals(mem, item, v)? {
            return Ok(i as i64);
        }
    }
    Ok(-1)
}

pub fn concat(mem: &mut Memory, a: HeapPtr, b: HeapPtr) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, a)?;
    let other = elem_kind(mem, b)?;
    if other != kind {
        return Err(err(
            ErrorKind::TypeMismatch,
            format!("cannot concat {other}[] onto {kind}[]"),
        ));
    }
    let mut items = to_values(mem, a)?;
    items.extend(to_values(mem, b)?);
    from_values(mem, kind, &items)
}

pub fn reverse(mem: &mut Memory, ptr: HeapPtr) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let mut items = to_values(mem, ptr)?;
    items.reverse();
    from_values(mem, kind, &items)
}

/// Keep the first occurrence of each distinct value, preserving order.
pub fn distinct(mem: &mut Memory, ptr: HeapPtr) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let items = to_values(mem, ptr)?;
    let mut kept: Vec<Value> = Vec::new();
    for item in items {
        let mut seen = false;
        for k in &kept {
            if arith::equals(mem, *k, item)? {
                seen = true;
                break;
            }
        }
        if !seen {
            kept.push(item);
        }
    }
    from_values(mem, kind, &kept)
}

pub fn slice(mem: &mut Memory, ptr: HeapPtr, start: i64, length: i64) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let items = to_values(mem, ptr)?;
    if start < 0 || length < 0 || (start + length) as usize > items.len() {
        return Err(out_of_range(start + length, items.len()));
    }
    from_values(mem, kind, &items[start as usize..(start + length) as usize])
}

/// Integer range `[start, end)`, counting down when `end < start`.
pub fn range(mem: &mut Memory, start: i64, end: i64) -> RunResult<HeapPtr> {
    let count = start.abs_diff(end);
    if count > sable_core::MAX_BLOCK_LEN as u64 / 4 {
        return Err(err(ErrorKind::OutOfMemory, "range too large"));
    }
    let mut items = Vec::with_capacity(count as usize);
    let step = if end >= start { 1 } else { -1 };
    let mut v = start;
    while v != end {
        items.push(Value::Int(i32::try_from(v).map_err(|_| {
            err(ErrorKind::Overflow, "range value does not fit in int")
        })?));
        v += step;
    }
    from_values(mem, Kind::Int, &items)
}

pub fn sort(mem: &mut Memory, ptr: HeapPtr, descending: bool) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let items = to_values(mem, ptr)?;
    let mut keyed: Vec<(SortKey, Value)> = Vec::with_capacity(items.len());
    for v in items {
        keyed.push((SortKey::of(mem, v)?, v));
    }
    keyed.sort_by(|a, b| a.0.cmp_key(&b.0));
    if descending {
        keyed.reverse();
    }
    let sorted: Vec<Value> = keyed.into_iter().map(|(_, v)| v).collect();
    from_values(mem, kind, &sorted)
}

/// Sort by a computed key.
pub fn sort_by(mem: &mut Memory, ptr: HeapPtr, key: &mut MapFn, descending: bool) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let items = to_values(mem, ptr)?;
    let mut keyed: Vec<(SortKey, Value)> = Vec::with_capacity(items.len());
    for v in items {
        let k = key(mem, v)?;
        keyed.push((SortKey::of(mem, k)?, v));
    }
    keyed.sort_by(|a, b| a.0.cmp_key(&b.0));
    if descending {
        keyed.reverse();
    }
    let sorted: Vec<Value> = keyed.into_iter().map(|(_, v)| v).collect();
    from_values(mem, kind, &sorted)
}

/// Map every element; the result's element kind follows the first mapped
/// value (`object` for an empty input).
pub fn select(mem: &mut Memory, ptr: HeapPtr, f: &mut MapFn) -> RunResult<HeapPtr> {
    let items = to_values(mem, ptr)?;
    let mut mapped = Vec::with_capacity(items.len());
    for v in items {
        mapped.push(f(mem, v)?);
    }
    let kind = common_kind(&mapped);
    from_values(mem, kind, &mapped)
}

pub fn where_(mem: &mut Memory, ptr: HeapPtr, pred: &mut PredFn) -> RunResult<HeapPtr> {
    let kind = elem_kind(mem, ptr)?;
    let items = to_values(mem, ptr)?;
    let mut kept = Vec::new();
    for v in items {
        if pred(mem, v)? {
            kept.push(v);
        }
    }
    from_values(mem, kind, &kept)
}

pub fn any(mem: &mut Memory, ptr: HeapPtr, pred: &mut PredFn) -> RunResult<bool> {
    for v in to_values(mem, ptr)? {
        if pred(mem, v)? {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn all(mem: &mut Memory, ptr: HeapPtr, pred: &mut PredFn) -> RunResult<bool> {
    for v in to_values(mem, ptr)? {
        if !pred(mem, v)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Minimum or maximum element by a computed key. Empty input is a
/// `DomainError`.
pub fn extremum(mem: &mut Memory, ptr: HeapPtr, key: &mut MapFn, min: bool) -> RunResult<Value> {
    let items = to_values(mem, ptr)?;
    let mut best: Option<(SortKey, Value)> = None;
    for v in items {
        let k = key(mem, v)?;
        let k = SortKey::of(mem, k)?;
        let replace = match &best {
            None => true,
            Some((bk, _)) => {
                let ord = k.cmp_key(bk);
                if min { ord == Ordering::Less } else { ord == Ordering::Greater }
            }
        };
        if replace {
            best = Some((k, v));
        }
    }
    best.map(|(_, v)| v)
        .ok_or_else(|| err(ErrorKind::DomainError, "sequence contains no elements"))
}

/// First/Last/Single family. `single` demands exactly one match;
/// `or_default` substitutes null for an empty result instead of failing.
pub fn find(
    mem: &mut Memory,
    ptr: HeapPtr,
    pred: &mut PredFn,
    from_end: bool,
    or_default: bool,
    single: bool,
) -> RunResult<Value> {
    let mut items = to_values(mem, ptr)?;
    if from_end {
        items.reverse();
    }
    let mut found: Option<Value> = None;
    for v in items {
        if pred(mem, v)? {
            if single && found.is_some() {
                return Err(err(
                    ErrorKind::DomainError,
                    "sequence contains more than one matching element",
                ));
            }
            found = Some(v);
            if !single {
                break;
            }
        }
    }
    match found {
        Some(v) => Ok(v),
        None if or_default => Ok(Value::Null),
        None => Err(err(ErrorKind::DomainError, "sequence contains no matching element")),
    }
}

pub fn count(mem: &Memory, ptr: HeapPtr) -> RunResult<i64> {
    Ok(len(mem, ptr)? as i64)
}

/// Sum of a numeric array, in the element kind.
pub fn sum(mem: &mut Memory, ptr: HeapPtr) -> RunResult<Value> {
    let kind = elem_kind(mem, ptr)?;
    if !kind.is_numeric() {
        return Err(non_numeric(kind, "Sum"));
    }
    let items = to_values(mem, ptr)?;
    let mut acc = coerce::cast(mem, Value::Int(0), kind)?;
    for v in items {
        acc = arith::binary(mem, arith::ArithOp::Add, acc, v)?;
    }
    Ok(acc)
}

/// Average of a numeric array: decimal arrays average exactly, every
/// other numeric kind averages as double. Empty input is a
/// `DomainError`.
pub fn average(mem: &mut Memory, ptr: HeapPtr) -> RunResult<Value> {
    let kind = elem_kind(mem, ptr)?;
    if !kind.is_numeric() {
        return Err(non_numeric(kind, "Average"));
    }
    let n = len(mem, ptr)?;
    if n == 0 {
        return Err(err(ErrorKind::DomainError, "sequence contains no elements"));
    }
    let total = sum(mem, ptr)?;
    if kind == Kind::Decimal {
        return arith::binary(
            mem,
            arith::ArithOp::Div,
            total,
            Value::Decimal(crate::decimal::Dec::from_i64(n as i64)),
        );
    }
    let total = coerce::cast(mem, total, Kind::Double)?;
    arith::binary(mem, arith::ArithOp::Div, total, Value::Double(n as f64))
}

/// Element kind that can hold all of `items`: the shared concrete kind,
/// `double` for mixed numerics, else `object`.
pub fn common_kind(items: &[Value]) -> Kind {
    let mut iter = items.iter().filter(|v| !v.is_null());
    let Some(first) = iter.next() else {
        return Kind::Object;
    };
    let mut kind = first.kind();
    for v in iter {
        let k = v.kind();
        if k == kind {
            continue;
        }
        if k.is_numeric() && kind.is_numeric() {
            kind = Kind::Double;
        } else {
            return Kind::Object;
        }
    }
    kind
}

fn out_of_range(index: i64, len: usize) -> sable_core::RuntimeError {
    err(
        ErrorKind::IndexOutOfRange,
        format!("index {index} out of range for length {len}"),
    )
}

fn non_numeric(kind: Kind, op: &str) -> sable_core::RuntimeError {
    err(
        ErrorKind::TypeMismatch,
        format!("{op} requires a numeric array, got {kind}[]"),
    )
}

/// Totally ordered key for sorting and extremum selection.
enum SortKey {
    Null,
    Int(i128),
    Float(f64),
    Dec(crate::decimal::Dec),
    Text(String),
    Ticks(i64),
    Flag(bool),
}

impl SortKey {
    fn of(mem: &Memory, v: Value) -> RunResult<SortKey> {
        let v = coerce::unwrap_nullable(mem, v)?;
        let key = match v {
            Value::Null => SortKey::Null,
            Value::Int(x) => SortKey::Int(x as i128),
            Value::Uint(x) => SortKey::Int(x as i128),
            Value::Long(x) => SortKey::Int(x as i128),
            Value::Ulong(x) => SortKey::Int(x as i128),
            Value::Short(x) => SortKey::Int(x as i128),
            Value::UShort(x) => SortKey::Int(x as i128),
            Value::Byte(x) => SortKey::Int(x as i128),
            Value::Sbyte(x) => SortKey::Int(x as i128),
            Value::Char(x) => SortKey::Int(x as i128),
            Value::Float(x) => SortKey::Float(x as f64),
            Value::Double(x) => SortKey::Float(x),
            Value::Decimal(x) => SortKey::Dec(x),
            Value::Bool(x) => SortKey::Flag(x),
            Value::DateTime(x) => SortKey::Ticks(x.ticks),
            Value::TimeSpan(x) => SortKey::Ticks(x.ticks),
            Value::Str(p) => SortKey::Text(crate::strings::read_string(mem, p)?),
            other => {
                return Err(err(
                    ErrorKind::TypeMismatch,
                    format!("{} values cannot be ordered", other.kind()),
                ));
            }
        };
        Ok(key)
    }

    fn cmp_key(&self, other: &SortKey) -> Ordering {
        match (self, other) {
            (SortKey::Int(a), SortKey::Int(b)) => a.cmp(b),
            (SortKey::Float(a), SortKey::Float(b)) => a.total_cmp(b),
            (SortKey::Int(a), SortKey::Float(b)) => (*a as f64).total_cmp(b),
            (SortKey::Float(a), SortKey::Int(b)) => a.total_cmp(&(*b as f64)),
            (SortKey::Dec(a), SortKey::Dec(b)) => a.cmp_dec(*b),
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Ticks(a), SortKey::Ticks(b)) => a.cmp(b),
            (SortKey::Flag(a), SortKey::Flag(b)) => a.cmp(b),
            // Heterogeneous object arrays order by kind bucket
            _ => self.bucket().cmp(&other.bucket()),
        }
    }

    fn bucket(&self) -> u8 {
        match self {
            SortKey::Null => 0,
            SortKey::Flag(_) => 1,
            SortKey::Int(_) => 2,
            SortKey::Float(_) => 3,
            SortKey::Dec(_) => 4,
            SortKey::Ticks(_) => 5,
            SortKey::Text(_) => 6,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strings::alloc_string;

    fn memory() -> Memory {
        Memory::new(8192, 1024).unwrap()
    }

    fn int_array(mem: &mut Memory, items: &[i32]) -> HeapPtr {
        let values: Vec<Value> = items.iter().map(|i| Value::Int(*i)).collect();
        from_values(mem, Kind::Int, &values).unwrap()
    }

    fn to_ints(mem: &Memory, ptr: HeapPtr) -> Vec<i64> {
        (0..len(mem, ptr).unwrap())
            .map(|i| match get(mem, ptr, i as i64, false).unwrap() {
                Value::Int(v) => v as i64,
                Value::Long(v) => v,
                other => panic!("expected integer value, got {other:?}"),
            })
            .collect()
    }

    #[test]
    fn test_len_and_get() {
        let mut m = memory();
        let a = int_array(&mut m, &[10, 20, 30]);
        assert_eq!(len(&m, a).unwrap(), 3);
        assert_eq!(get(&m, a, 1, false).unwrap(), Value::Int(20));
        // from-end indexing: a[^1] is the last element
        assert_eq!(get(&m, a, 1, true).unwrap(), Value::Int(30));
        assert_eq!(
            get(&m, a, -1, false).unwrap_err().kind,
            ErrorKind::IndexOutOfRange
        );
        assert_eq!(
            get(&m, a, 3, false).unwrap_err().kind,
            ErrorKind::IndexOutOfRange
        );
    }

    #[test]
    fn test_set_casts_to_element_kind() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2]);
        set(&mut m, a, 0, false, Value::Long(9)).unwrap();
        assert_eq!(get(&m, a, 0, false).unwrap(), Value::Int(9));
        assert_eq!(
            set(&mut m, a, 0, false, Value::Long(i64::MAX)).unwrap_err().kind,
            ErrorKind::Overflow
        );
    }

    #[test]
    fn test_add_remove_insert() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2]);
        let b = add(&mut m, a, Value::Int(3)).unwrap();
        assert_eq!(to_ints(&m, b), vec![1, 2, 3]);
        let c = add_at(&mut m, b, 0, Value::Int(0)).unwrap();
        assert_eq!(to_ints(&m, c), vec![0, 1, 2, 3]);
        let d = remove_at(&mut m, c, 1).unwrap();
        assert_eq!(to_ints(&m, d), vec![0, 2, 3]);
        assert_eq!(
            remove_at(&mut m, d, 5).unwrap_err().kind,
            ErrorKind::IndexOutOfRange
        );
    }

    #[test]
    fn test_index_of_and_concat() {
        let mut m = memory();
        let a = int_array(&mut m, &[5, 7, 9]);
        assert_eq!(index_of(&m, a, Value::Int(7)).unwrap(), 1);
        assert_eq!(index_of(&m, a, Value::Int(8)).unwrap(), -1);
        let b = int_array(&mut m, &[1]);
        let c = concat(&mut m, a, b).unwrap();
        assert_eq!(to_ints(&m, c), vec![5, 7, 9, 1]);
    }

    #[test]
    fn test_sort_reverse_equals_sort_descending() {
        let mut m = memory();
        let a = int_array(&mut m, &[3, 1, 2]);
        let asc = sort(&mut m, a, false).unwrap();
        let rev = reverse(&mut m, asc).unwrap();
        let desc = sort(&mut m, a, true).unwrap();
        assert_eq!(to_ints(&m, rev), to_ints(&m, desc));
    }

    #[test]
    fn test_distinct_idempotent() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2, 1, 3, 2]);
        let d1 = distinct(&mut m, a).unwrap();
        assert_eq!(to_ints(&m, d1), vec![1, 2, 3]);
        let d2 = distinct(&mut m, d1).unwrap();
        assert_eq!(to_ints(&m, d1), to_ints(&m, d2));
    }

    #[test]
    fn test_slice_and_range() {
        let mut m = memory();
        let r = range(&mut m, 1, 5).unwrap();
        assert_eq!(to_ints(&m, r), vec![1, 2, 3, 4]);
        let down = range(&mut m, 3, 0).unwrap();
        assert_eq!(to_ints(&m, down), vec![3, 2, 1]);
        let s = slice(&mut m, r, 1, 2).unwrap();
        assert_eq!(to_ints(&m, s), vec![2, 3]);
        assert_eq!(
            slice(&mut m, r, 3, 4).unwrap_err().kind,
            ErrorKind::IndexOutOfRange
        );
    }

    #[test]
    fn test_select_where_any_all() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2, 3, 4]);
        let doubled = select(&mut m, a, &mut |mem, v| {
            arith::binary(mem, arith::ArithOp::Mul, v, Value::Int(2))
        })
        .unwrap();
        assert_eq!(to_ints(&m, doubled), vec![2, 4, 6, 8]);

        let evens = where_(&mut m, a, &mut |mem, v| {
            let r = arith::binary(mem, arith::ArithOp::Rem, v, Value::Int(2))?;
            Ok(r == Value::Int(0))
        })
        .unwrap();
        assert_eq!(to_ints(&m, evens), vec![2, 4]);

        assert!(any(&mut m, a, &mut |_, v| Ok(v == Value::Int(3))).unwrap());
        assert!(!all(&mut m, a, &mut |_, v| Ok(v == Value::Int(3))).unwrap());
    }

    #[test]
    fn test_find_single_semantics() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2, 2, 3]);
        let mut twos = |_: &mut Memory, v: Value| Ok(v == Value::Int(2));
        assert_eq!(
            find(&mut m, a, &mut twos, false, false, true).unwrap_err().kind,
            ErrorKind::DomainError
        );
        let mut nines = |_: &mut Memory, v: Value| Ok(v == Value::Int(9));
        assert_eq!(
            find(&mut m, a, &mut nines, false, false, false).unwrap_err().kind,
            ErrorKind::DomainError
        );
        assert_eq!(find(&mut m, a, &mut nines, false, true, false).unwrap(), Value::Null);
        let mut odd = |_: &mut Memory, v: Value| {
            Ok(matches!(v, Value::Int(x) if x % 2 == 1))
        };
        assert_eq!(find(&mut m, a, &mut odd, true, false, false).unwrap(), Value::Int(3));
    }

    #[test]
    fn test_extremum() {
        let mut m = memory();
        let a = int_array(&mut m, &[4, 1, 7]);
        let mut id = |_: &mut Memory, v: Value| Ok(v);
        assert_eq!(extremum(&mut m, a, &mut id, true).unwrap(), Value::Int(1));
        assert_eq!(extremum(&mut m, a, &mut id, false).unwrap(), Value::Int(7));
        let empty = int_array(&mut m, &[]);
        assert_eq!(
            extremum(&mut m, empty, &mut id, true).unwrap_err().kind,
            ErrorKind::DomainError
        );
    }

    #[test]
    fn test_sum_and_average() {
        let mut m = memory();
        let a = int_array(&mut m, &[1, 2, 3]);
        assert_eq!(sum(&mut m, a).unwrap(), Value::Int(6));
        assert_eq!(average(&mut m, a).unwrap(), Value::Double(2.0));

        let s1 = alloc_string(&mut m, "a").unwrap();
        let strs = from_values(&mut m, Kind::Str, &[Value::Str(s1)]).unwrap();
        assert_eq!(average(&mut m, strs).unwrap_err().kind, ErrorKind::TypeMismatch);

        let empty = int_array(&mut m, &[]);
        assert_eq!(average(&mut m, empty).unwrap_err().kind, ErrorKind::DomainError);
    }

    #[test]
    fn test_string_array_slots() {
        let mut m = memory();
        let s1 = alloc_string(&mut m, "b").unwrap();
        let s2 = alloc_string(&mut m, "a").unwrap();
        let a = from_values(&mut m, Kind::Str, &[Value::Str(s1), Value::Str(s2), Value::Null])
            .unwrap();
        assert_eq!(get(&m, a, 2, false).unwrap(), Value::Null);
        let sorted = sort(&mut m, a, false).unwrap();
        // nulls order ahead of text via the bucket fallback
        assert_eq!(get(&m, sorted, 2, false).unwrap(), Value::Str(s1));
    }

    #[test]
    fn test_common_kind() {
        assert_eq!(common_kind(&[Value::Int(1), Value::Int(2)]), Kind::Int);
        assert_eq!(common_kind(&[Value::Int(1), Value::Double(2.0)]), Kind::Double);
        assert_eq!(common_kind(&[Value::Int(1), Value::Bool(true)]), Kind::Object);
        assert_eq!(common_kind(&[]), Kind::Object);
    }
}
