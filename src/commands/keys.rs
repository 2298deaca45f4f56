//! Generic key commands: DEL, EXISTS, FLUSHDB, TYPE, RENAME, RENAMENX,
//! KEYS, EXPIRE, TTL, PERSIST, and PING.

use crate::commands::{
    arg_i64, arg_str, no_prepare, read_all_keys, read_first_key, write_all_keys,
    write_first_key, CmdArgs, Command, Pattern,
};
use crate::db::KeySpace;
use crate::protocol::RespValue;
use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn register(table: &mut HashMap<&'static str, Command>) {
    table.insert(
        "del",
        Command {
            executor: exec_del,
            prepare: write_all_keys,
            arity: -2,
        },
    );
    table.insert(
        "exists",
        Command {
            executor: exec_exists,
            prepare: read_all_keys,
            arity: -2,
        },
    );
    table.insert(
        "flushdb",
        Command {
            executor: exec_flushdb,
            prepare: no_prepare,
            arity: -1,
        },
    );
    table.insert(
        "type",
        Command {
            executor: exec_type,
            prepare: read_first_key,
            arity: 2,
        },
    );
    table.insert(
        "rename",
        Command {
            executor: exec_rename,
            prepare: write_all_keys,
            arity: 3,
        },
    );
    table.insert(
        "renamenx",
        Command {
            executor: exec_renamenx,
            prepare: write_all_keys,
            arity: 3,
        },
    );
    table.insert(
        "keys",
        Command {
            executor: exec_keys,
            prepare: no_prepare,
            arity: 2,
        },
    );
    table.insert(
        "expire",
        Command {
            executor: exec_expire,
            prepare: write_first_key,
            arity: 3,
        },
    );
    table.insert(
        "ttl",
        Command {
            executor: exec_ttl,
            prepare: read_first_key,
            arity: 2,
        },
    );
    table.insert(
        "persist",
        Command {
            executor: exec_persist,
            prepare: write_first_key,
            arity: 2,
        },
    );
    table.insert(
        "ping",
        Command {
            executor: exec_ping,
            prepare: no_prepare,
            arity: -1,
        },
    );
}

fn exec_del(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let keys: Vec<String> = args.iter().map(arg_str).collect();
    RespValue::integer(db.removes(&keys) as i64)
}

fn exec_exists(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let mut found = 0i64;
    for arg in args {
        if db.get_entity(&arg_str(arg)).is_some() {
            found += 1;
        }
    }
    RespValue::integer(found)
}

fn exec_flushdb(db: &KeySpace, _args: &CmdArgs) -> RespValue {
    db.flush();
    RespValue::ok()
}

fn exec_type(db: &KeySpace, args: &CmdArgs) -> RespValue {
    match db.get_entity(&arg_str(&args[0])) {
        None => RespValue::status("none"),
        Some(entity) => RespValue::status(entity.type_name()),
    }
}

fn exec_rename(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    let entity = match db.get_entity(&src) {
        None => return RespValue::error("no such key"),
        Some(entity) => entity,
    };
    let ttl = db.ttl_at(&src);

    db.remove(&src);
    db.put_entity(&dest, entity);
    db.persist(&dest);
    if let Some(at) = ttl {
        // The remaining expiry travels with the value.
        db.expire_at(&dest, at);
    }
    RespValue::ok()
}

fn exec_renamenx(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let src = arg_str(&args[0]);
    let dest = arg_str(&args[1]);

    if db.get_entity(&dest).is_some() {
        return RespValue::integer(0);
    }
    let entity = match db.get_entity(&src) {
        None => return RespValue::error("no such key"),
        Some(entity) => entity,
    };
    let ttl = db.ttl_at(&src);

    db.remove(&src);
    db.put_entity(&dest, entity);
    db.persist(&dest);
    if let Some(at) = ttl {
        db.expire_at(&dest, at);
    }
    RespValue::integer(1)
}

fn exec_keys(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let pattern = match Pattern::compile(&arg_str(&args[0])) {
        Err(_) => return RespValue::error("ERR illegal wildcard"),
        Ok(pattern) => pattern,
    };

    let mut matched = Vec::new();
    db.for_each_key(|key| {
        if pattern.matches(key) {
            matched.push(key.to_string());
        }
        true
    });
    // Logically expired keys are absent to readers.
    matched.retain(|key| !db.is_expired(key));

    RespValue::from_args(matched.into_iter().map(bytes::Bytes::from))
}

fn exec_expire(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    let secs = match arg_i64(&args[1]) {
        None => return RespValue::error("ERR value is not an integer or out of range"),
        Some(secs) => secs,
    };
    if db.get_entity(&key).is_none() {
        return RespValue::integer(0);
    }
    let at = if secs <= 0 {
        // Already due: the key becomes logically absent immediately.
        Instant::now()
    } else {
        Instant::now() + Duration::from_secs(secs as u64)
    };
    db.expire_at(&key, at);
    RespValue::integer(1)
}

fn exec_ttl(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() {
        return RespValue::integer(-2);
    }
    match db.ttl_at(&key) {
        None => RespValue::integer(-1),
        Some(at) => {
            let remaining = at.saturating_duration_since(Instant::now());
            RespValue::integer(remaining.as_secs() as i64)
        }
    }
}

fn exec_persist(db: &KeySpace, args: &CmdArgs) -> RespValue {
    let key = arg_str(&args[0]);
    if db.get_entity(&key).is_none() || db.ttl_at(&key).is_none() {
        return RespValue::integer(0);
    }
    db.persist(&key);
    RespValue::integer(1)
}

fn exec_ping(_db: &KeySpace, args: &CmdArgs) -> RespValue {
    match args.len() {
        0 => RespValue::pong(),
        1 => RespValue::bulk(args[0].clone()),
        _ => RespValue::arg_num_error("ping"),
    }
}
