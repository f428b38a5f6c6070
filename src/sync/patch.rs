//! Leaf-level diffs between two JSON state trees.
//!
//! A transaction never ships whole documents: the committed draft is diffed
//! against the value it was checked out from and only the leaves that changed
//! travel. Objects are walked key by key; every other value (arrays included)
//! is a leaf and is replaced wholesale. Two clients writing different leaves
//! of the same document therefore never clobber each other, while two writes
//! to the same leaf resolve to whichever reached the hub last.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single leaf write.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Write {
    /// Set the value at `path`, creating intermediate objects as needed.
    Set { path: Vec<String>, value: Value },
    /// Remove the key at `path`. Missing parents make this a no-op.
    Remove { path: Vec<String> },
}

impl Write {
    pub fn path(&self) -> &[String] {
        match self {
            Write::Set { path, .. } | Write::Remove { path } => path,
        }
    }
}

/// Compute the writes turning `before` into `after`.
pub fn diff(before: &Value, after: &Value) -> Vec<Write> {
    let mut out = Vec::new();
    let mut path = Vec::new();
    diff_into(&mut path, before, after, &mut out);
    out
}

fn diff_into(path: &mut Vec<String>, before: &Value, after: &Value, out: &mut Vec<Write>) {
    match (before, after) {
        (Value::Object(old), Value::Object(new)) => {
            for (key, new_value) in new {
                path.push(key.clone());
                match old.get(key) {
                    Some(old_value) => diff_into(path, old_value, new_value, out),
                    None => out.push(Write::Set {
                        path: path.clone(),
                        value: new_value.clone(),
                    }),
                }
                path.pop();
            }
            for key in old.keys().filter(|key| !new.contains_key(*key)) {
                let mut removed = path.clone();
                removed.push(key.clone());
                out.push(Write::Remove { path: removed });
            }
        }
        _ if before == after => {}
        _ => out.push(Write::Set {
            path: path.clone(),
            value: after.clone(),
        }),
    }
}

/// Apply writes in order.
pub fn apply(target: &mut Value, writes: &[Write]) {
    for write in writes {
        apply_one(target, write);
    }
}

fn apply_one(target: &mut Value, write: &Write) {
    match write {
        Write::Set { path, value } => {
            let Some((last, parents)) = path.split_last() else {
                *target = value.clone();
                return;
            };
            let mut cursor = target;
            for segment in parents {
                cursor = ensure_object(cursor)
                    .entry(segment.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
            }
            ensure_object(cursor).insert(last.clone(), value.clone());
        }
        Write::Remove { path } => {
            let Some((last, parents)) = path.split_last() else {
                return;
            };
            let mut cursor = target;
            for segment in parents {
                cursor = match cursor.get_mut(segment.as_str()) {
                    Some(next) => next,
                    None => return,
                };
            }
            if let Value::Object(map) = cursor {
                map.remove(last);
            }
        }
    }
}

fn ensure_object(value: &mut Value) -> &mut Map<String, Value> {
    if !value.is_object() {
        *value = Value::Object(Map::new());
    }
    match value {
        Value::Object(map) => map,
        _ => unreachable!("value was replaced by an object above"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn unchanged_documents_produce_no_writes() {
        let doc = json!({"a": 1, "b": {"c": [1, 2]}});
        assert!(diff(&doc, &doc).is_empty());
    }

    #[test]
    fn nested_changes_become_leaf_writes() {
        let before = json!({"team": {"health": 100, "armor": 50}, "round": 1});
        let after = json!({"team": {"health": 80, "armor": 50}, "round": 1});
        assert_eq!(
            diff(&before, &after),
            vec![Write::Set {
                path: vec!["team".into(), "health".into()],
                value: json!(80),
            }]
        );
    }

    #[test]
    fn removed_keys_are_reported() {
        let before = json!({"players": {"a": {"name": "Ann"}, "b": {"name": "Bob"}}});
        let after = json!({"players": {"a": {"name": "Ann"}}});
        assert_eq!(
            diff(&before, &after),
            vec![Write::Remove {
                path: vec!["players".into(), "b".into()],
            }]
        );
    }

    #[test]
    fn arrays_are_replaced_wholesale() {
        let before = json!({"list": [1, 2, 3]});
        let after = json!({"list": [1, 2]});
        let writes = diff(&before, &after);
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].path(), ["list".to_string()]);
    }

    #[test]
    fn applying_a_diff_reproduces_the_target() {
        let before = json!({"a": 1, "b": {"c": true, "d": "x"}, "e": null});
        let after = json!({"a": 2, "b": {"c": true, "f": [1]}, "g": {"h": 1}});
        let mut replica = before.clone();
        apply(&mut replica, &diff(&before, &after));
        assert_eq!(replica, after);
    }

    #[test]
    fn disjoint_writes_merge_independently() {
        let base = json!({"x": 0, "y": 0});
        let from_a = diff(&base, &json!({"x": 1, "y": 0}));
        let from_b = diff(&base, &json!({"x": 0, "y": 2}));

        let mut ab = base.clone();
        apply(&mut ab, &from_a);
        apply(&mut ab, &from_b);
        let mut ba = base.clone();
        apply(&mut ba, &from_b);
        apply(&mut ba, &from_a);

        assert_eq!(ab, json!({"x": 1, "y": 2}));
        assert_eq!(ab, ba);
    }

    #[test]
    fn set_creates_missing_parents_and_remove_tolerates_them() {
        let mut doc = json!({});
        apply(
            &mut doc,
            &[
                Write::Set {
                    path: vec!["a".into(), "b".into()],
                    value: json!(1),
                },
                Write::Remove {
                    path: vec!["x".into(), "y".into()],
                },
            ],
        );
        assert_eq!(doc, json!({"a": {"b": 1}}));
    }
}
