//! String commands: GET, SET, SETNX, SETEX, GETSET, STRLEN.

use crate::commands::{
    arg_i64, arg_str, read_first_key, write_first_key, CmdArgs, Command,
};
use crate::db::{DataEntity, KeySpace};
use crate::protocol::RespValue;
use bytes::Bytes;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    table.insert(
        "get",
        Command {
            executor: exec_get,
            prepare: read_first_key,
            arity: 2,
        },
    );
    table.insert(
        "set",
        Command {
            executor: exec_set,
            prepare: write_first_key,
            arity: -3,
        },
    );
    table.insert(
        "setnx",
        Command {
            executor: exec_setnx,
            prepare: write_first_key,
            arity: 3,
        },
    );
    table.insert(
        "setex",
        Command {
            executor: exec_setex,
            prepare: write_first_key,
            arity: 4,
        },
    );
    table.insert(
        "getset",
        Command {
            executor: exec_getset,
            prepare: write_first_key,
            arity: 3,
        },
    );
    table.insert(
        "strlen",
        Command {
            executor: exec_strlen,
            prepare: read_first_key,
            arity: 2,
        },
    );
}

/// Reads the string value bound to `key`; an entity of another type is a
/// WRONGTYPE error.
fn get_as_string(db: &KeySpace, key: &str) -> Result<Option<Bytes>, RespValue> {
    match db.get_entity(key) {
        None => Ok(None),
        Some(DataEntity::Bytes(b)) => Ok(Some(b)),
        Some(_) => Err(RespValue::wrong_type_error()),
    }
}

fn exec_get(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    match get_as_string(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespValue::null(),
        Ok(Some(bytes)) => RespValue::bulk(bytes),
    }
}

fn exec_set(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    let value = args[1].clone();

    let ttl = match args.len() {
        2 => None,
        4 if args[2].eq_ignore_ascii_case(b"EX") => match arg_i64(&args[3]) {
            None => {
                return RespValue::error("ERR value is not an integer or out of range");
            }
            Some(secs) if secs <= 0 => {
                return RespValue::error("ERR invalid expire time in set");
            }
            Some(secs) => Some(Duration::from_secs(secs as u64)),
        },
        _ => return RespValue::syntax_error(),
    };

    db.put_entity(&key, DataEntity::Bytes(value));
    match ttl {
        Some(ttl) => db.expire_at(&key, Instant::now() + ttl),
        // A plain overwrite discards any previous expiry.
        None => db.persist(&key),
    }
    RespValue::ok()
}

fn exec_setnx(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    // A logically expired key must not block the insert.
    db.is_expired(&key);
    let inserted = db.put_if_absent(&key, DataEntity::Bytes(args[1].clone()));
    RespValue::integer(inserted as i64)
}

fn exec_setex(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    let secs = match arg_i64(&args[1]) {
        None => return RespValue::error("ERR value is not an integer or out of range"),
        Some(secs) if secs <= 0 => {
            return RespValue::error("ERR invalid expire time in setex");
        }
        Some(secs) => secs as u64,
    };
    db.put_entity(&key, DataEntity::Bytes(args[2].clone()));
    db.expire_at(&key, Instant::now() + Duration::from_secs(secs));
    RespValue::ok()
}

fn exec_getset(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    let old = match get_as_string(db, &key) {
        Err(reply) => return reply,
        Ok(old) => old,
    };
    db.put_entity(&key, DataEntity::Bytes(args[1].clone()));
    db.persist(&key);
    match old {
        None => RespValue::null(),
        Some(bytes) => RespValue::bulk(bytes),
    }
}

fn exec_strlen(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    match get_as_string(db, &key) {
        Err(reply) => reply,
        Ok(None) => RespValue::integer(0),
        Ok(Some(bytes)) => RespValue::integer(bytes.len() as i64),
    }
}

#[cfg(test)]
mod tests {
    use crate::db::{DataEntity, KeySpace};
    use crate::protocol::RespValue;
    use crate::storage::TimeWheel;
    use bytes::Bytes;
    use std::collections::HashMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn test_db() -> Arc<KeySpace> {
        KeySpace::new(0, TimeWheel::with_defaults())
    }

    fn cmd(parts: &[&str]) -> Vec<Bytes> {
        parts.iter().map(|p| Bytes::from(p.to_string())).collect()
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["set", "k", "v"])), RespValue::ok());
        assert_eq!(
            db.exec(&cmd(&["get", "k"])),
            RespValue::bulk(Bytes::from("v"))
        );
        assert_eq!(db.exec(&cmd(&["get", "missing"])), RespValue::null());
    }

    #[tokio::test]
    async fn test_set_with_ex_seconds() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["set", "k", "v", "EX", "100"])), RespValue::ok());
        let ttl = db.exec(&cmd(&["ttl", "k"])).as_integer().unwrap();
        assert!((99..=100).contains(&ttl), "unexpected ttl {}", ttl);

        // Lowercase keyword is accepted.
        assert_eq!(db.exec(&cmd(&["set", "k", "v", "ex", "50"])), RespValue::ok());
    }

    #[tokio::test]
    async fn test_set_ex_errors() {
        let db = test_db();
        assert_eq!(
            db.exec(&cmd(&["set", "k", "v", "EX", "abc"])),
            RespValue::error("ERR value is not an integer or out of range")
        );
        assert_eq!(
            db.exec(&cmd(&["set", "k", "v", "EX", "0"])),
            RespValue::error("ERR invalid expire time in set")
        );
        assert_eq!(
            db.exec(&cmd(&["set", "k", "v", "PX", "10"])),
            RespValue::syntax_error()
        );
        assert_eq!(
            db.exec(&cmd(&["set", "k", "v", "EX"])),
            RespValue::syntax_error()
        );
    }

    #[tokio::test]
    async fn test_plain_set_clears_ttl() {
        let db = test_db();
        db.exec(&cmd(&["set", "k", "v", "EX", "100"]));
        db.exec(&cmd(&["set", "k", "w"]));
        assert_eq!(db.exec(&cmd(&["ttl", "k"])), RespValue::integer(-1));
    }

    #[tokio::test]
    async fn test_setnx() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["setnx", "k", "v"])), RespValue::integer(1));
        assert_eq!(db.exec(&cmd(&["setnx", "k", "w"])), RespValue::integer(0));
        assert_eq!(
            db.exec(&cmd(&["get", "k"])),
            RespValue::bulk(Bytes::from("v"))
        );
    }

    #[tokio::test]
    async fn test_setnx_after_logical_expiry() {
        let db = test_db();
        db.put_entity("k", DataEntity::Bytes(Bytes::from("old")));
        db.expire_at(
            "k",
            tokio::time::Instant::now() - Duration::from_secs(1),
        );
        assert_eq!(db.exec(&cmd(&["setnx", "k", "new"])), RespValue::integer(1));
        assert_eq!(
            db.exec(&cmd(&["get", "k"])),
            RespValue::bulk(Bytes::from("new"))
        );
    }

    #[tokio::test]
    async fn test_setex() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["setex", "k", "100", "v"])), RespValue::ok());
        assert_eq!(
            db.exec(&cmd(&["get", "k"])),
            RespValue::bulk(Bytes::from("v"))
        );
        let ttl = db.exec(&cmd(&["ttl", "k"])).as_integer().unwrap();
        assert!(ttl > 0);
        assert_eq!(
            db.exec(&cmd(&["setex", "k", "0", "v"])),
            RespValue::error("ERR invalid expire time in setex")
        );
    }

    #[tokio::test]
    async fn test_getset() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["getset", "k", "v1"])), RespValue::null());
        assert_eq!(
            db.exec(&cmd(&["getset", "k", "v2"])),
            RespValue::bulk(Bytes::from("v1"))
        );
        assert_eq!(
            db.exec(&cmd(&["get", "k"])),
            RespValue::bulk(Bytes::from("v2"))
        );
    }

    #[tokio::test]
    async fn test_strlen() {
        let db = test_db();
        assert_eq!(db.exec(&cmd(&["strlen", "k"])), RespValue::integer(0));
        db.exec(&cmd(&["set", "k", "hello"]));
        assert_eq!(db.exec(&cmd(&["strlen", "k"])), RespValue::integer(5));
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let db = test_db();
        db.put_entity("h", DataEntity::Hash(HashMap::new()));
        assert_eq!(db.exec(&cmd(&["get", "h"])), RespValue::wrong_type_error());
        assert_eq!(
            db.exec(&cmd(&["strlen", "h"])),
            RespValue::wrong_type_error()
        );
        assert_eq!(
            db.exec(&cmd(&["getset", "h", "v"])),
            RespValue::wrong_type_error()
        );
    }

    #[tokio::test]
    async fn test_arity_errors() {
        let db = test_db();
        assert_eq!(
            db.exec(&cmd(&["get"])),
            RespValue::arg_num_error("get")
        );
        assert_eq!(
            db.exec(&cmd(&["set", "k"])),
            RespValue::arg_num_error("set")
        );
        assert_eq!(
            db.exec(&cmd(&["setex", "k", "10"])),
            RespValue::arg_num_error("setex")
        );
    }
}
