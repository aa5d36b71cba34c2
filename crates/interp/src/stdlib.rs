//! Built-in native bindings
//!
//! A small battery of callbacks registered through the same
//! `register-native` surface a host uses, so the adapter path is the
//! one executing them: `Math` basics and the per-type `Parse` bindings.
//! (`Console`, `Json` and `InvokeByAttribute` are intrinsics; they
//! need the raw evaluator state.)

use crate::dispatch::{HostValue, NativeFn, NativeParam, NativeRegistry};
use crate::natives::NativeCtx;
use sable_core::kind::Kind;
use sable_runtime::datetime::Date;
use sable_runtime::decimal::Dec;
use std::rc::Rc;

/// Build a `NativeFn` from a declared signature and a closure.
pub fn native_fn(
    params: &[(&str, Kind)],
    f: impl Fn(&mut NativeCtx<'_>, Vec<HostValue>) -> Result<HostValue, String> + 'static,
) -> NativeFn {
    NativeFn {
        params: params
            .iter()
            .map(|(name, kind)| NativeParam {
                name: (*name).to_string(),
                kind: *kind,
                optional: false,
            })
            .collect(),
        variadic: false,
        func: Rc::new(f),
    }
}

fn double_arg(args: &[HostValue], i: usize) -> Result<f64, String> {
    match args.get(i) {
        Some(HostValue::Double(x)) => Ok(*x),
        Some(HostValue::Int(x)) => Ok(*x as f64),
        Some(HostValue::Uint(x)) => Ok(*x as f64),
        other => Err(format!("expected a number, got {other:?}")),
    }
}

fn int_arg(args: &[HostValue], i: usize) -> Result<i64, String> {
    match args.get(i) {
        Some(HostValue::Int(x)) => Ok(*x),
        Some(HostValue::Uint(x)) => i64::try_from(*x).map_err(|_| "value out of range".into()),
        other => Err(format!("expected an integer, got {other:?}")),
    }
}

fn str_arg(args: &[HostValue], i: usize) -> Result<String, String> {
    match args.get(i) {
        Some(HostValue::Str(s)) => Ok(s.clone()),
        other => Err(format!("expected a string, got {other:?}")),
    }
}

/// Register the standard battery into `natives`.
pub fn register(natives: &mut NativeRegistry) {
    // Math: each entry under a name is one overload
    natives.register(
        "Math.Abs",
        native_fn(&[("value", Kind::Long)], |_, args| {
            Ok(HostValue::Int(int_arg(&args, 0)?.abs()))
        }),
    );
    natives.register(
        "Math.Abs",
        native_fn(&[("value", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.abs()))
        }),
    );
    natives.register(
        "Math.Min",
        native_fn(&[("a", Kind::Long), ("b", Kind::Long)], |_, args| {
            Ok(HostValue::Int(int_arg(&args, 0)?.min(int_arg(&args, 1)?)))
        }),
    );
    natives.register(
        "Math.Min",
        native_fn(&[("a", Kind::Double), ("b", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.min(double_arg(&args, 1)?)))
        }),
    );
    natives.register(
        "Math.Max",
        native_fn(&[("a", Kind::Long), ("b", Kind::Long)], |_, args| {
            Ok(HostValue::Int(int_arg(&args, 0)?.max(int_arg(&args, 1)?)))
        }),
    );
    natives.register(
        "Math.Max",
        native_fn(&[("a", Kind::Double), ("b", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.max(double_arg(&args, 1)?)))
        }),
    );
    natives.register(
        "Math.Sqrt",
        native_fn(&[("value", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.sqrt()))
        }),
    );
    natives.register(
        "Math.Pow",
        native_fn(&[("base", Kind::Double), ("exponent", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.powf(double_arg(&args, 1)?)))
        }),
    );
    natives.register(
        "Math.Floor",
        native_fn(&[("value", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.floor()))
        }),
    );
    natives.register(
        "Math.Ceiling",
        native_fn(&[("value", Kind::Double)], |_, args| {
            Ok(HostValue::Double(double_arg(&args, 0)?.ceil()))
        }),
    );
    natives.register(
        "Math.Round",
        native_fn(&[("value", Kind::Double)], |_, args| {
            let x = double_arg(&args, 0)?;
            // Round half to even, matching the decimal paths
            let rounded = if (x - x.trunc()).abs() == 0.5 {
                let down = x.trunc();
                if down as i64 % 2 == 0 { down } else { down + x.signum() }
            } else {
                x.round()
            };
            Ok(HostValue::Double(rounded))
        }),
    );

    // Per-type parsing
    natives.register(
        "int.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            str_arg(&args, 0)?
                .trim()
                .parse::<i32>()
                .map(|v| HostValue::Int(v as i64))
                .map_err(|e| e.to_string())
        }),
    );
    natives.register(
        "long.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            str_arg(&args, 0)?
                .trim()
                .parse::<i64>()
                .map(HostValue::Int)
                .map_err(|e| e.to_string())
        }),
    );
    natives.register(
        "double.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            str_arg(&args, 0)?
                .trim()
                .parse::<f64>()
                .map(HostValue::Double)
                .map_err(|e| e.to_string())
        }),
    );
    natives.register(
        "decimal.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            Dec::parse(&str_arg(&args, 0)?)
                .map(HostValue::Decimal)
                .map_err(|e| e.to_string())
        }),
    );
    natives.register(
        "bool.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            match str_arg(&args, 0)?.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(HostValue::Bool(true)),
                "false" => Ok(HostValue::Bool(false)),
                other => Err(format!("'{other}' is not a bool")),
            }
        }),
    );
    natives.register(
        "DateTime.Parse",
        native_fn(&[("text", Kind::Str)], |_, args| {
            Date::parse(&str_arg(&args, 0)?)
                .map(HostValue::DateTime)
                .map_err(|e| e.to_string())
        }),
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registration_creates_overload_sets() {
        let mut natives = NativeRegistry::default();
        register(&mut natives);
        assert_eq!(natives.overloads("Math.Abs").unwrap().len(), 2);
        assert_eq!(natives.overloads("Math.Min").unwrap().len(), 2);
        assert!(natives.contains("int.Parse"));
        assert!(!natives.contains("Math.Tan"));
    }
}
