//! Built-in classes of the in-memory runtime

use super::builder::ClassDef;
use super::heap::{identity_hash, ArrayData, ObjId, Payload, SimHeap, SimValue};
use super::SimError;
use crate::foreign::PrimitiveTag;
use std::cmp::Ordering;

type Outcome = Result<SimValue, ObjId>;

const PRIMITIVES: [(&str, PrimitiveTag); 9] = [
    ("void", PrimitiveTag::Void),
    ("boolean", PrimitiveTag::Boolean),
    ("byte", PrimitiveTag::Byte),
    ("char", PrimitiveTag::Char),
    ("short", PrimitiveTag::Short),
    ("int", PrimitiveTag::Int),
    ("long", PrimitiveTag::Long),
    ("float", PrimitiveTag::Float),
    ("double", PrimitiveTag::Double),
];

pub(crate) fn install(heap: &SimHeap) -> Result<(), SimError> {
    for (name, tag) in PRIMITIVES {
        heap.define_primitive(name, tag);
    }

    let mut defs = vec![object(), class(), string()];
    defs.extend(interfaces());
    defs.extend(throwables());
    defs.extend(boxes());
    defs.extend(collections());
    heap.define_classes(defs)?;
    Ok(())
}

fn obj(id: ObjId) -> SimValue {
    SimValue::Ref(Some(id))
}

fn this(heap: &SimHeap, this: Option<ObjId>) -> Result<ObjId, ObjId> {
    this.ok_or_else(|| heap.exception("java.lang.NullPointerException", "null receiver"))
}

fn arg(args: &[SimValue], index: usize) -> Option<ObjId> {
    args.get(index).and_then(SimValue::as_obj)
}

fn int_arg(args: &[SimValue], index: usize) -> i64 {
    args.get(index).and_then(SimValue::as_long).unwrap_or(0)
}

fn new_str(heap: &SimHeap, s: &str) -> Outcome {
    Ok(obj(heap.new_string(s)))
}

fn object() -> ClassDef {
    ClassDef::new("java.lang.Object")
        .method("toString", &[], "java.lang.String", |heap, t, _| {
            let t = this(heap, t)?;
            new_str(heap, &heap.java_to_string(Some(t)))
        })
        .method("hashCode", &[], "int", |heap, t, _| {
            Ok(SimValue::Int(identity_hash(this(heap, t)?)))
        })
        .method("equals", &["java.lang.Object"], "boolean", |heap, t, args| {
            Ok(SimValue::Bool(Some(this(heap, t)?) == arg(args, 0)))
        })
        .method("getClass", &[], "java.lang.Class", |heap, t, _| {
            let t = this(heap, t)?;
            Ok(SimValue::Ref(heap.class_of(t)))
        })
}

fn class() -> ClassDef {
    ClassDef::new("java.lang.Class").method("getName", &[], "java.lang.String", |heap, t, _| {
        let name = heap.class_name(this(heap, t)?).unwrap_or_default();
        new_str(heap, &name)
    })
}

fn utf16(heap: &SimHeap, id: ObjId) -> Vec<u16> {
    heap.string(id).unwrap_or_default().encode_utf16().collect()
}

fn string() -> ClassDef {
    ClassDef::new("java.lang.String")
        .implements("java.lang.Comparable")
        .implements("java.lang.CharSequence")
        .constructor(&[], |heap, t, _| {
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Str(String::new()));
            Ok(SimValue::Void)
        })
        .constructor(&["java.lang.String"], |heap, t, args| {
            let copy = arg(args, 0).and_then(|s| heap.string(s)).unwrap_or_default();
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Str(copy));
            Ok(SimValue::Void)
        })
        .method("length", &[], "int", |heap, t, _| {
            Ok(SimValue::Int(utf16(heap, this(heap, t)?).len() as i32))
        })
        .method("isEmpty", &[], "boolean", |heap, t, _| {
            Ok(SimValue::Bool(utf16(heap, this(heap, t)?).is_empty()))
        })
        .method("charAt", &["int"], "char", |heap, t, args| {
            let units = utf16(heap, this(heap, t)?);
            let index = int_arg(args, 0);
            usize::try_from(index)
                .ok()
                .and_then(|i| units.get(i).copied())
                .map(SimValue::Char)
                .ok_or_else(|| heap.exception("java.lang.IndexOutOfBoundsException", &format!("index {}", index)))
        })
        .method("concat", &["java.lang.String"], "java.lang.String", |heap, t, args| {
            let mut s = heap.string(this(heap, t)?).unwrap_or_default();
            let other = arg(args, 0).ok_or_else(|| heap.exception("java.lang.NullPointerException", "concat"))?;
            s.push_str(&heap.string(other).unwrap_or_default());
            new_str(heap, &s)
        })
        .method("toUpperCase", &[], "java.lang.String", |heap, t, _| {
            let s = heap.string(this(heap, t)?).unwrap_or_default();
            new_str(heap, &s.to_uppercase())
        })
        .method("toString", &[], "java.lang.String", |heap, t, _| Ok(obj(this(heap, t)?)))
        .method("hashCode", &[], "int", |heap, t, _| Ok(SimValue::Int(heap.java_hash(this(heap, t)?))))
        .method("equals", &["java.lang.Object"], "boolean", |heap, t, args| {
            Ok(SimValue::Bool(heap.java_equals(Some(this(heap, t)?), arg(args, 0))))
        })
        .method("compareTo", &["java.lang.Object"], "int", |heap, t, args| {
            let a = utf16(heap, this(heap, t)?);
            let other = arg(args, 0).ok_or_else(|| heap.exception("java.lang.NullPointerException", "compareTo"))?;
            if heap.string(other).is_none() {
                return Err(heap.exception("java.lang.ClassCastException", "not a java.lang.String"));
            }
            let b = utf16(heap, other);
            let diff = a
                .iter()
                .zip(&b)
                .find(|(x, y)| x != y)
                .map(|(x, y)| *x as i32 - *y as i32)
                .unwrap_or(a.len() as i32 - b.len() as i32);
            Ok(SimValue::Int(diff))
        })
}

fn interfaces() -> Vec<ClassDef> {
    vec![
        ClassDef::interface("java.lang.Comparable").abstract_method("compareTo", &["java.lang.Object"], "int"),
        ClassDef::interface("java.lang.CharSequence").abstract_method("length", &[], "int"),
        ClassDef::interface("java.lang.Iterable").abstract_method("iterator", &[], "java.util.Iterator"),
        ClassDef::interface("java.util.Iterator")
            .abstract_method("hasNext", &[], "boolean")
            .abstract_method("next", &[], "java.lang.Object"),
        ClassDef::interface("java.util.Collection")
            .implements("java.lang.Iterable")
            .abstract_method("size", &[], "int")
            .abstract_method("isEmpty", &[], "boolean")
            .abstract_method("contains", &["java.lang.Object"], "boolean")
            .abstract_method("add", &["java.lang.Object"], "boolean")
            .abstract_method("addAll", &["java.util.Collection"], "boolean")
            .abstract_method("remove", &["java.lang.Object"], "boolean"),
        ClassDef::interface("java.util.List")
            .implements("java.util.Collection")
            .abstract_method("get", &["int"], "java.lang.Object")
            .abstract_method("set", &["int", "java.lang.Object"], "java.lang.Object")
            .abstract_method("remove", &["int"], "java.lang.Object"),
        ClassDef::interface("java.util.Set").implements("java.util.Collection"),
        ClassDef::interface("java.util.Map")
            .abstract_method("size", &[], "int")
            .abstract_method("isEmpty", &[], "boolean")
            .abstract_method("get", &["java.lang.Object"], "java.lang.Object")
            .abstract_method("put", &["java.lang.Object", "java.lang.Object"], "java.lang.Object")
            .abstract_method("remove", &["java.lang.Object"], "java.lang.Object")
            .abstract_method("containsKey", &["java.lang.Object"], "boolean")
            .abstract_method("keySet", &[], "java.util.Set"),
    ]
}

fn throwable(name: &str, parent: Option<&str>) -> ClassDef {
    let mut def = ClassDef::new(name)
        .constructor(&[], |heap, t, _| {
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Throwable(None));
            Ok(SimValue::Void)
        })
        .constructor(&["java.lang.String"], |heap, t, args| {
            let message = arg(args, 0).and_then(|m| heap.string(m));
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Throwable(message));
            Ok(SimValue::Void)
        });
    if let Some(parent) = parent {
        def = def.extends(parent);
    } else {
        def = def
            .method("getMessage", &[], "java.lang.String", |heap, t, _| {
                match heap.payload(this(heap, t)?) {
                    Some(Payload::Throwable(Some(m))) => new_str(heap, &m),
                    _ => Ok(SimValue::Ref(None)),
                }
            })
            .method("toString", &[], "java.lang.String", |heap, t, _| {
                let t = this(heap, t)?;
                new_str(heap, &heap.java_to_string(Some(t)))
            });
    }
    def
}

fn throwables() -> Vec<ClassDef> {
    vec![
        throwable("java.lang.Throwable", None),
        throwable("java.lang.Error", Some("java.lang.Throwable")),
        throwable("java.lang.Exception", Some("java.lang.Throwable")),
        throwable("java.lang.RuntimeException", Some("java.lang.Exception")),
        throwable("java.lang.IllegalStateException", Some("java.lang.RuntimeException")),
        throwable("java.lang.IllegalArgumentException", Some("java.lang.RuntimeException")),
        throwable("java.lang.IndexOutOfBoundsException", Some("java.lang.RuntimeException")),
        throwable(
            "java.lang.ArrayIndexOutOfBoundsException",
            Some("java.lang.IndexOutOfBoundsException"),
        ),
        throwable("java.lang.NullPointerException", Some("java.lang.RuntimeException")),
        throwable("java.lang.ClassCastException", Some("java.lang.RuntimeException")),
        throwable("java.lang.ArrayStoreException", Some("java.lang.RuntimeException")),
        throwable("java.lang.UnsupportedOperationException", Some("java.lang.RuntimeException")),
        throwable("java.util.NoSuchElementException", Some("java.lang.RuntimeException")),
        throwable("java.lang.NoClassDefFoundError", Some("java.lang.Error")),
        throwable("java.lang.NoSuchMethodError", Some("java.lang.Error")),
    ]
}

fn boxed_value(heap: &SimHeap, id: ObjId) -> Option<SimValue> {
    match heap.payload(id)? {
        Payload::Boxed(v) => Some(v),
        _ => None,
    }
}

fn compare_boxed(a: SimValue, b: SimValue) -> Option<Ordering> {
    match (a, b) {
        (SimValue::Bool(x), SimValue::Bool(y)) => Some(x.cmp(&y)),
        (SimValue::Float(_), _) | (SimValue::Double(_), _) => a.as_double()?.partial_cmp(&b.as_double()?),
        _ => Some(a.as_long()?.cmp(&b.as_long()?)),
    }
}

fn boxed(name: &str, primitive: &'static str, numeric: bool) -> ClassDef {
    let mut def = if numeric {
        ClassDef::new(name).extends("java.lang.Number")
    } else {
        ClassDef::new(name)
    };
    let self_name = name.to_string();
    def = def
        .implements("java.lang.Comparable")
        .constructor(&[primitive], |heap, t, args| {
            let value = args.first().copied().unwrap_or(SimValue::Void);
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Boxed(value));
            Ok(SimValue::Void)
        })
        .static_method("valueOf", &[primitive], name, |heap, _, args| {
            Ok(obj(heap.boxed(args.first().copied().unwrap_or(SimValue::Void))))
        })
        .method(&format!("{}Value", primitive), &[], primitive, |heap, t, _| {
            boxed_value(heap, this(heap, t)?).ok_or_else(|| heap.exception("java.lang.IllegalStateException", "empty box"))
        })
        .method("toString", &[], "java.lang.String", |heap, t, _| {
            let t = this(heap, t)?;
            new_str(heap, &heap.java_to_string(Some(t)))
        })
        .method("hashCode", &[], "int", |heap, t, _| Ok(SimValue::Int(heap.java_hash(this(heap, t)?))))
        .method("equals", &["java.lang.Object"], "boolean", |heap, t, args| {
            Ok(SimValue::Bool(heap.java_equals(Some(this(heap, t)?), arg(args, 0))))
        })
        .method("compareTo", &["java.lang.Object"], "int", move |heap, t, args| {
            let t = this(heap, t)?;
            let other = arg(args, 0).ok_or_else(|| heap.exception("java.lang.NullPointerException", "compareTo"))?;
            let same_class = heap.class_of(other).and_then(|c| heap.class_name(c)).as_deref() == Some(self_name.as_str());
            let ordering = match (same_class, boxed_value(heap, t), boxed_value(heap, other)) {
                (true, Some(a), Some(b)) => compare_boxed(a, b),
                _ => None,
            };
            match ordering {
                Some(o) => Ok(SimValue::Int(o as i32)),
                None => Err(heap.exception("java.lang.ClassCastException", &format!("not a {}", self_name))),
            }
        });
    def
}

fn number() -> ClassDef {
    let unbox = |heap: &SimHeap, t: Option<ObjId>| -> Result<SimValue, ObjId> {
        boxed_value(heap, this(heap, t)?).ok_or_else(|| heap.exception("java.lang.IllegalStateException", "empty box"))
    };
    ClassDef::new("java.lang.Number")
        .method("intValue", &[], "int", move |heap, t, _| {
            let v = unbox(heap, t)?;
            Ok(SimValue::Int(v.as_long().unwrap_or_else(|| v.as_double().unwrap_or(0.0) as i64) as i32))
        })
        .method("longValue", &[], "long", move |heap, t, _| {
            let v = unbox(heap, t)?;
            Ok(SimValue::Long(v.as_long().unwrap_or_else(|| v.as_double().unwrap_or(0.0) as i64)))
        })
        .method("doubleValue", &[], "double", move |heap, t, _| {
            Ok(SimValue::Double(unbox(heap, t)?.as_double().unwrap_or(0.0)))
        })
}

fn boxes() -> Vec<ClassDef> {
    vec![
        number(),
        boxed("java.lang.Boolean", "boolean", false),
        boxed("java.lang.Character", "char", false),
        boxed("java.lang.Byte", "byte", true),
        boxed("java.lang.Short", "short", true),
        boxed("java.lang.Integer", "int", true),
        boxed("java.lang.Long", "long", true),
        boxed("java.lang.Float", "float", true),
        boxed("java.lang.Double", "double", true),
    ]
}

fn elements(heap: &SimHeap, id: ObjId) -> Vec<Option<ObjId>> {
    match heap.payload(id) {
        Some(Payload::List(items)) | Some(Payload::Set(items)) => items,
        Some(Payload::Map(entries)) => entries.into_iter().map(|(k, _)| k).collect(),
        Some(Payload::Array(ArrayData::Object { items, .. })) => items,
        _ => Vec::new(),
    }
}

fn position(heap: &SimHeap, items: &[Option<ObjId>], needle: Option<ObjId>) -> Option<usize> {
    items.iter().position(|item| heap.java_equals(*item, needle))
}

fn index_error(heap: &SimHeap, index: i64, size: usize) -> ObjId {
    heap.exception(
        "java.lang.IndexOutOfBoundsException",
        &format!("Index: {}, Size: {}", index, size),
    )
}

fn checked_index(heap: &SimHeap, index: i64, size: usize) -> Result<usize, ObjId> {
    usize::try_from(index)
        .ok()
        .filter(|i| *i < size)
        .ok_or_else(|| index_error(heap, index, size))
}

fn new_iterator(heap: &SimHeap, items: Vec<Option<ObjId>>) -> SimValue {
    let class = heap.class_by_name("java.util.ArrayList$Itr").unwrap_or(heap.object_class());
    obj(heap.alloc(class, Payload::Iter { items, pos: 0 }))
}

fn collection(name: &str, interface: &str, unique: bool) -> ClassDef {
    ClassDef::new(name)
        .implements(interface)
        .constructor(&[], move |heap, t, _| {
            let empty = if unique { Payload::Set(Vec::new()) } else { Payload::List(Vec::new()) };
            heap.with_payload(this(heap, t)?, |p| *p = empty);
            Ok(SimValue::Void)
        })
        .method("size", &[], "int", |heap, t, _| {
            Ok(SimValue::Int(elements(heap, this(heap, t)?).len() as i32))
        })
        .method("isEmpty", &[], "boolean", |heap, t, _| {
            Ok(SimValue::Bool(elements(heap, this(heap, t)?).is_empty()))
        })
        .method("contains", &["java.lang.Object"], "boolean", |heap, t, args| {
            let items = elements(heap, this(heap, t)?);
            Ok(SimValue::Bool(position(heap, &items, arg(args, 0)).is_some()))
        })
        .method("add", &["java.lang.Object"], "boolean", move |heap, t, args| {
            let t = this(heap, t)?;
            let value = arg(args, 0);
            if unique && position(heap, &elements(heap, t), value).is_some() {
                return Ok(SimValue::Bool(false));
            }
            heap.with_payload(t, |p| {
                if let Payload::List(items) | Payload::Set(items) = p {
                    items.push(value);
                }
            });
            Ok(SimValue::Bool(true))
        })
        .method("addAll", &["java.util.Collection"], "boolean", move |heap, t, args| {
            let t = this(heap, t)?;
            let other = arg(args, 0).ok_or_else(|| heap.exception("java.lang.NullPointerException", "addAll"))?;
            let mut current = elements(heap, t);
            let mut changed = false;
            for value in elements(heap, other) {
                if unique && position(heap, &current, value).is_some() {
                    continue;
                }
                current.push(value);
                changed = true;
            }
            heap.with_payload(t, |p| {
                if let Payload::List(items) | Payload::Set(items) = p {
                    *items = current;
                }
            });
            Ok(SimValue::Bool(changed))
        })
        .method("remove", &["java.lang.Object"], "boolean", |heap, t, args| {
            let t = this(heap, t)?;
            let Some(index) = position(heap, &elements(heap, t), arg(args, 0)) else {
                return Ok(SimValue::Bool(false));
            };
            heap.with_payload(t, |p| {
                if let Payload::List(items) | Payload::Set(items) = p {
                    items.remove(index);
                }
            });
            Ok(SimValue::Bool(true))
        })
        .method("iterator", &[], "java.util.Iterator", |heap, t, _| {
            Ok(new_iterator(heap, elements(heap, this(heap, t)?)))
        })
        .method("equals", &["java.lang.Object"], "boolean", |heap, t, args| {
            Ok(SimValue::Bool(heap.java_equals(Some(this(heap, t)?), arg(args, 0))))
        })
}

fn array_list() -> ClassDef {
    collection("java.util.ArrayList", "java.util.List", false)
        .method("get", &["int"], "java.lang.Object", |heap, t, args| {
            let items = elements(heap, this(heap, t)?);
            let index = checked_index(heap, int_arg(args, 0), items.len())?;
            Ok(SimValue::Ref(items[index]))
        })
        .method("set", &["int", "java.lang.Object"], "java.lang.Object", |heap, t, args| {
            let t = this(heap, t)?;
            let size = elements(heap, t).len();
            let index = checked_index(heap, int_arg(args, 0), size)?;
            let value = arg(args, 1);
            let old = heap.with_payload(t, |p| match p {
                Payload::List(items) => std::mem::replace(&mut items[index], value),
                _ => None,
            });
            Ok(SimValue::Ref(old.flatten()))
        })
        .method("remove", &["int"], "java.lang.Object", |heap, t, args| {
            let t = this(heap, t)?;
            let size = elements(heap, t).len();
            let index = checked_index(heap, int_arg(args, 0), size)?;
            let old = heap.with_payload(t, |p| match p {
                Payload::List(items) => items.remove(index),
                _ => None,
            });
            Ok(SimValue::Ref(old.flatten()))
        })
}

fn map_entries(heap: &SimHeap, id: ObjId) -> Vec<(Option<ObjId>, Option<ObjId>)> {
    match heap.payload(id) {
        Some(Payload::Map(entries)) => entries,
        _ => Vec::new(),
    }
}

fn key_index(heap: &SimHeap, entries: &[(Option<ObjId>, Option<ObjId>)], key: Option<ObjId>) -> Option<usize> {
    entries.iter().position(|(k, _)| heap.java_equals(*k, key))
}

fn hash_map() -> ClassDef {
    ClassDef::new("java.util.HashMap")
        .implements("java.util.Map")
        .constructor(&[], |heap, t, _| {
            heap.with_payload(this(heap, t)?, |p| *p = Payload::Map(Vec::new()));
            Ok(SimValue::Void)
        })
        .method("size", &[], "int", |heap, t, _| {
            Ok(SimValue::Int(map_entries(heap, this(heap, t)?).len() as i32))
        })
        .method("isEmpty", &[], "boolean", |heap, t, _| {
            Ok(SimValue::Bool(map_entries(heap, this(heap, t)?).is_empty()))
        })
        .method("get", &["java.lang.Object"], "java.lang.Object", |heap, t, args| {
            let entries = map_entries(heap, this(heap, t)?);
            let value = key_index(heap, &entries, arg(args, 0)).and_then(|i| entries[i].1);
            Ok(SimValue::Ref(value))
        })
        .method("containsKey", &["java.lang.Object"], "boolean", |heap, t, args| {
            let entries = map_entries(heap, this(heap, t)?);
            Ok(SimValue::Bool(key_index(heap, &entries, arg(args, 0)).is_some()))
        })
        .method("put", &["java.lang.Object", "java.lang.Object"], "java.lang.Object", |heap, t, args| {
            let t = this(heap, t)?;
            let (key, value) = (arg(args, 0), arg(args, 1));
            let index = key_index(heap, &map_entries(heap, t), key);
            let old = heap.with_payload(t, |p| match p {
                Payload::Map(entries) => match index {
                    Some(i) => std::mem::replace(&mut entries[i].1, value),
                    None => {
                        entries.push((key, value));
                        None
                    }
                },
                _ => None,
            });
            Ok(SimValue::Ref(old.flatten()))
        })
        .method("remove", &["java.lang.Object"], "java.lang.Object", |heap, t, args| {
            let t = this(heap, t)?;
            let Some(index) = key_index(heap, &map_entries(heap, t), arg(args, 0)) else {
                return Ok(SimValue::Ref(None));
            };
            let old = heap.with_payload(t, |p| match p {
                Payload::Map(entries) => entries.remove(index).1,
                _ => None,
            });
            Ok(SimValue::Ref(old.flatten()))
        })
        .method("keySet", &[], "java.util.Set", |heap, t, _| {
            let keys = elements(heap, this(heap, t)?);
            Ok(obj(heap.new_set(keys)))
        })
}

fn iterator() -> ClassDef {
    ClassDef::new("java.util.ArrayList$Itr")
        .implements("java.util.Iterator")
        .method("hasNext", &[], "boolean", |heap, t, _| {
            let more = heap.with_payload(this(heap, t)?, |p| match p {
                Payload::Iter { items, pos } => *pos < items.len(),
                _ => false,
            });
            Ok(SimValue::Bool(more.unwrap_or(false)))
        })
        .method("next", &[], "java.lang.Object", |heap, t, _| {
            let next = heap.with_payload(this(heap, t)?, |p| match p {
                Payload::Iter { items, pos } if *pos < items.len() => {
                    *pos += 1;
                    Some(items[*pos - 1])
                }
                _ => None,
            });
            match next {
                Some(Some(item)) => Ok(SimValue::Ref(item)),
                _ => Err(heap.exception("java.util.NoSuchElementException", "iterator exhausted")),
            }
        })
}

fn collections() -> Vec<ClassDef> {
    vec![
        array_list(),
        collection("java.util.HashSet", "java.util.Set", true),
        hash_map(),
        iterator(),
    ]
}
