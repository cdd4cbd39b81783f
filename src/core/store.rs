use std::path::Path;
use std::time::Duration;

use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row};
use tokio::sync::{mpsc, oneshot};

use crate::core::error::{db_err, ChatError, ChatResult};
use crate::core::models::{
    ChatMessage, Identity, MediaId, MediaRecord, MessageId, NewIdentity, Thread, ThreadId, UserId,
};

/// Messages returned by a conversation fetch when the caller gives no limit.
pub const DEFAULT_MESSAGE_WINDOW: u32 = 50;

/// Schema DDL run on open.
const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS identities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    login TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    email TEXT NOT NULL,
    roles TEXT NOT NULL DEFAULT '[]',
    is_admin INTEGER NOT NULL DEFAULT 0,
    managed_by INTEGER,
    credential TEXT
);

CREATE INDEX IF NOT EXISTS idx_identities_email ON identities(email);

CREATE TABLE IF NOT EXISTS role_catalog (
    name TEXT PRIMARY KEY
);

CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    file_name TEXT NOT NULL,
    mime_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS threads (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_a INTEGER NOT NULL,
    user_b INTEGER NOT NULL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE (user_a, user_b),
    CHECK (user_a < user_b)
);

CREATE INDEX IF NOT EXISTS idx_threads_user_b ON threads(user_b);

CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    thread_id INTEGER NOT NULL REFERENCES threads(id),
    sender_id INTEGER NOT NULL,
    body TEXT NOT NULL DEFAULT '',
    attachment_id INTEGER REFERENCES media(id),
    created_at INTEGER NOT NULL,
    is_read INTEGER NOT NULL DEFAULT 0,
    CHECK (body <> '' OR attachment_id IS NOT NULL)
);

CREATE INDEX IF NOT EXISTS idx_messages_thread
    ON messages(thread_id, created_at DESC, id DESC);

CREATE INDEX IF NOT EXISTS idx_messages_unread
    ON messages(thread_id, is_read, sender_id);
";

const THREAD_COLUMNS: &str = "id, user_a, user_b, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, thread_id, sender_id, body, attachment_id, created_at, is_read";
const IDENTITY_COLUMNS: &str = "id, login, display_name, email, roles, is_admin, managed_by";

// ---------------------------------------------------------------------------
// Commands sent from async world → background thread
// ---------------------------------------------------------------------------

type Reply<T> = oneshot::Sender<ChatResult<T>>;

enum StoreCmd {
    FindThread {
        a: UserId,
        b: UserId,
        reply: Reply<Option<Thread>>,
    },
    CreateThread {
        a: UserId,
        b: UserId,
        now: i64,
        reply: Reply<Thread>,
    },
    Thread {
        id: ThreadId,
        reply: Reply<Option<Thread>>,
    },
    ThreadsFor {
        user: UserId,
        reply: Reply<Vec<Thread>>,
    },
    UserInThread {
        user: UserId,
        thread: ThreadId,
        reply: Reply<bool>,
    },
    Touch {
        thread: ThreadId,
        now: i64,
        reply: Reply<()>,
    },
    Append {
        thread: ThreadId,
        sender: UserId,
        text: String,
        attachment: Option<MediaId>,
        now: i64,
        reply: Reply<ChatMessage>,
    },
    Latest {
        thread: ThreadId,
        limit: u32,
        reply: Reply<Vec<ChatMessage>>,
    },
    MarkReadExcept {
        thread: ThreadId,
        reader: UserId,
        reply: Reply<usize>,
    },
    UnreadForUser {
        user: UserId,
        reply: Reply<u32>,
    },
    UnreadInThread {
        thread: ThreadId,
        reader: UserId,
        reply: Reply<u32>,
    },
    Identity {
        id: UserId,
        reply: Reply<Option<Identity>>,
    },
    FindIdentity {
        login: String,
        email: String,
        reply: Reply<Option<Identity>>,
    },
    CreateIdentity {
        new: NewIdentity,
        reply: Reply<Identity>,
    },
    RoleExists {
        name: String,
        reply: Reply<bool>,
    },
    RegisterRole {
        name: String,
        reply: Reply<()>,
    },
    InsertMedia {
        file_name: String,
        mime_type: String,
        size: u64,
        now: i64,
        reply: Reply<MediaId>,
    },
    Media {
        id: MediaId,
        reply: Reply<Option<MediaRecord>>,
    },
    DeleteMedia {
        id: MediaId,
        reply: Reply<Option<MediaRecord>>,
    },
}

// ---------------------------------------------------------------------------
// StoreHandle: Clone + Send + Sync async facade
// ---------------------------------------------------------------------------

/// Thread store, message store, and the host tables (identities, role
/// catalog, media) they lean on. All SQL runs on one background thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::UnboundedSender<StoreCmd>,
}

impl StoreHandle {
    /// Open (or create) the database file and spawn the background thread.
    pub fn open(path: &Path) -> ChatResult<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| ChatError::Storage(format!("create store dir: {e}")))?;
        }
        let conn = Connection::open(path).map_err(db_err("open store"))?;
        log::info!("Store opened at {}", path.display());
        Self::start(conn)
    }

    /// Private in-memory database, used by tests and throwaway sessions.
    pub fn open_in_memory() -> ChatResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err("open in-memory store"))?;
        Self::start(conn)
    }

    fn start(conn: Connection) -> ChatResult<Self> {
        conn.busy_timeout(Duration::from_secs(5))
            .map_err(db_err("set busy timeout"))?;
        conn.pragma_update(None, "foreign_keys", true)
            .map_err(db_err("enable foreign keys"))?;
        conn.execute_batch(SCHEMA).map_err(db_err("init schema"))?;

        let (tx, rx) = mpsc::unbounded_channel();

        std::thread::Builder::new()
            .name("deskchat-store".into())
            .spawn(move || Self::run_loop(conn, rx))
            .map_err(|e| ChatError::Storage(format!("spawn store thread: {e}")))?;

        Ok(StoreHandle { tx })
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> StoreCmd) -> ChatResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .map_err(|_| ChatError::Storage("store unavailable".into()))?;
        rx.await
            .map_err(|_| ChatError::Storage("store unavailable".into()))?
    }

    // -- thread store --------------------------------------------------------

    /// Order-independent lookup by participant pair.
    pub async fn find_thread(&self, a: UserId, b: UserId) -> ChatResult<Option<Thread>> {
        self.request(|reply| StoreCmd::FindThread { a, b, reply }).await
    }

    /// Insert the thread for `{a, b}`. If another writer got there first the
    /// existing row is returned instead, so every caller sees one thread.
    pub async fn create_thread(&self, a: UserId, b: UserId, now: i64) -> ChatResult<Thread> {
        self.request(|reply| StoreCmd::CreateThread { a, b, now, reply })
            .await
    }

    pub async fn thread(&self, id: ThreadId) -> ChatResult<Option<Thread>> {
        self.request(|reply| StoreCmd::Thread { id, reply }).await
    }

    /// Threads involving `user`, most recently active first.
    pub async fn threads_for(&self, user: UserId) -> ChatResult<Vec<Thread>> {
        self.request(|reply| StoreCmd::ThreadsFor { user, reply }).await
    }

    pub async fn user_in_thread(&self, user: UserId, thread: ThreadId) -> ChatResult<bool> {
        self.request(|reply| StoreCmd::UserInThread {
            user,
            thread,
            reply,
        })
        .await
    }

    pub async fn touch(&self, thread: ThreadId, now: i64) -> ChatResult<()> {
        self.request(|reply| StoreCmd::Touch { thread, now, reply })
            .await
    }

    // -- message store -------------------------------------------------------

    /// Insert a message and bump the thread's `updated_at` in one transaction.
    pub async fn append(
        &self,
        thread: ThreadId,
        sender: UserId,
        text: &str,
        attachment: Option<MediaId>,
        now: i64,
    ) -> ChatResult<ChatMessage> {
        let text = text.to_string();
        self.request(|reply| StoreCmd::Append {
            thread,
            sender,
            text,
            attachment,
            now,
            reply,
        })
        .await
    }

    /// The newest `limit` messages, returned oldest first.
    pub async fn latest(&self, thread: ThreadId, limit: u32) -> ChatResult<Vec<ChatMessage>> {
        self.request(|reply| StoreCmd::Latest {
            thread,
            limit,
            reply,
        })
        .await
    }

    /// Mark everything in `thread` not sent by `reader` as read. Returns the
    /// number of messages that changed state.
    pub async fn mark_read_except(&self, thread: ThreadId, reader: UserId) -> ChatResult<usize> {
        self.request(|reply| StoreCmd::MarkReadExcept {
            thread,
            reader,
            reply,
        })
        .await
    }

    pub async fn unread_count_for_user(&self, user: UserId) -> ChatResult<u32> {
        self.request(|reply| StoreCmd::UnreadForUser { user, reply })
            .await
    }

    pub async fn unread_in_thread(&self, thread: ThreadId, reader: UserId) -> ChatResult<u32> {
        self.request(|reply| StoreCmd::UnreadInThread {
            thread,
            reader,
            reply,
        })
        .await
    }

    // -- host tables ---------------------------------------------------------

    pub async fn identity(&self, id: UserId) -> ChatResult<Option<Identity>> {
        self.request(|reply| StoreCmd::Identity { id, reply }).await
    }

    pub async fn find_identity(&self, login: &str, email: &str) -> ChatResult<Option<Identity>> {
        let (login, email) = (login.to_string(), email.to_string());
        self.request(|reply| StoreCmd::FindIdentity {
            login,
            email,
            reply,
        })
        .await
    }

    /// Insert a host account. A login that already exists yields the
    /// existing account.
    pub async fn create_identity(&self, new: NewIdentity) -> ChatResult<Identity> {
        self.request(|reply| StoreCmd::CreateIdentity { new, reply })
            .await
    }

    pub async fn role_exists(&self, name: &str) -> ChatResult<bool> {
        let name = name.to_string();
        self.request(|reply| StoreCmd::RoleExists { name, reply })
            .await
    }

    pub async fn register_role(&self, name: &str) -> ChatResult<()> {
        let name = name.to_string();
        self.request(|reply| StoreCmd::RegisterRole { name, reply })
            .await
    }

    pub async fn insert_media(
        &self,
        file_name: &str,
        mime_type: &str,
        size: u64,
        now: i64,
    ) -> ChatResult<MediaId> {
        let (file_name, mime_type) = (file_name.to_string(), mime_type.to_string());
        self.request(|reply| StoreCmd::InsertMedia {
            file_name,
            mime_type,
            size,
            now,
            reply,
        })
        .await
    }

    pub async fn media(&self, id: MediaId) -> ChatResult<Option<MediaRecord>> {
        self.request(|reply| StoreCmd::Media { id, reply }).await
    }

    /// Remove a media row nothing refers to. Returns what was removed.
    pub async fn delete_media(&self, id: MediaId) -> ChatResult<Option<MediaRecord>> {
        self.request(|reply| StoreCmd::DeleteMedia { id, reply })
            .await
    }

    // -- background thread ---------------------------------------------------

    fn run_loop(conn: Connection, mut rx: mpsc::UnboundedReceiver<StoreCmd>) {
        while let Some(cmd) = rx.blocking_recv() {
            match cmd {
                StoreCmd::FindThread { a, b, reply } => {
                    let _ = reply.send(Self::do_find_thread(&conn, a, b));
                }
                StoreCmd::CreateThread { a, b, now, reply } => {
                    let _ = reply.send(Self::do_create_thread(&conn, a, b, now));
                }
                StoreCmd::Thread { id, reply } => {
                    let _ = reply.send(Self::do_thread(&conn, id));
                }
                StoreCmd::ThreadsFor { user, reply } => {
                    let _ = reply.send(Self::do_threads_for(&conn, user));
                }
                StoreCmd::UserInThread {
                    user,
                    thread,
                    reply,
                } => {
                    let _ = reply.send(Self::do_user_in_thread(&conn, user, thread));
                }
                StoreCmd::Touch { thread, now, reply } => {
                    let _ = reply.send(Self::do_touch(&conn, thread, now).map(|_| ()));
                }
                StoreCmd::Append {
                    thread,
                    sender,
                    text,
                    attachment,
                    now,
                    reply,
                } => {
                    let _ = reply.send(Self::do_append(
                        &conn, thread, sender, &text, attachment, now,
                    ));
                }
                StoreCmd::Latest {
                    thread,
                    limit,
                    reply,
                } => {
                    let _ = reply.send(Self::do_latest(&conn, thread, limit));
                }
                StoreCmd::MarkReadExcept {
                    thread,
                    reader,
                    reply,
                } => {
                    let _ = reply.send(Self::do_mark_read_except(&conn, thread, reader));
                }
                StoreCmd::UnreadForUser { user, reply } => {
                    let _ = reply.send(Self::do_unread_for_user(&conn, user));
                }
                StoreCmd::UnreadInThread {
                    thread,
                    reader,
                    reply,
                } => {
                    let _ = reply.send(Self::do_unread_in_thread(&conn, thread, reader));
                }
                StoreCmd::Identity { id, reply } => {
                    let _ = reply.send(Self::do_identity(&conn, id));
                }
                StoreCmd::FindIdentity {
                    login,
                    email,
                    reply,
                } => {
                    let _ = reply.send(Self::do_find_identity(&conn, &login, &email));
                }
                StoreCmd::CreateIdentity { new, reply } => {
                    let _ = reply.send(Self::do_create_identity(&conn, &new));
                }
                StoreCmd::RoleExists { name, reply } => {
                    let _ = reply.send(Self::do_role_exists(&conn, &name));
                }
                StoreCmd::RegisterRole { name, reply } => {
                    let _ = reply.send(Self::do_register_role(&conn, &name));
                }
                StoreCmd::InsertMedia {
                    file_name,
                    mime_type,
                    size,
                    now,
                    reply,
                } => {
                    let _ = reply.send(Self::do_insert_media(
                        &conn, &file_name, &mime_type, size, now,
                    ));
                }
                StoreCmd::Media { id, reply } => {
                    let _ = reply.send(Self::do_media(&conn, id));
                }
                StoreCmd::DeleteMedia { id, reply } => {
                    let _ = reply.send(Self::do_delete_media(&conn, id));
                }
            }
        }
        log::debug!("Store thread exiting");
    }

    // -- synchronous DB operations -------------------------------------------

    fn do_find_thread(conn: &Connection, a: UserId, b: UserId) -> ChatResult<Option<Thread>> {
        let (lo, hi) = ordered(a, b);
        conn.query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE user_a = ?1 AND user_b = ?2"),
            params![lo, hi],
            thread_from_row,
        )
        .optional()
        .map_err(db_err("find thread"))
    }

    fn do_create_thread(conn: &Connection, a: UserId, b: UserId, now: i64) -> ChatResult<Thread> {
        if a == b {
            return Err(ChatError::InvalidRequest(
                "a thread needs two distinct participants".into(),
            ));
        }
        let (lo, hi) = ordered(a, b);
        let inserted = conn.execute(
            "INSERT INTO threads (user_a, user_b, created_at, updated_at) VALUES (?1, ?2, ?3, ?3)",
            params![lo, hi, now],
        );

        match inserted {
            Ok(_) => Ok(Thread {
                id: conn.last_insert_rowid(),
                user_a: lo,
                user_b: hi,
                created_at: now,
                updated_at: now,
            }),
            Err(e) if is_constraint_violation(&e) => {
                log::debug!("Thread ({lo}, {hi}) already exists, reusing it");
                Self::do_find_thread(conn, lo, hi)?.ok_or_else(|| {
                    ChatError::Storage(format!("thread ({lo}, {hi}) missing after conflict"))
                })
            }
            Err(e) => Err(db_err("insert thread")(e)),
        }
    }

    fn do_thread(conn: &Connection, id: ThreadId) -> ChatResult<Option<Thread>> {
        conn.query_row(
            &format!("SELECT {THREAD_COLUMNS} FROM threads WHERE id = ?1"),
            [id],
            thread_from_row,
        )
        .optional()
        .map_err(db_err("load thread"))
    }

    fn do_threads_for(conn: &Connection, user: UserId) -> ChatResult<Vec<Thread>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {THREAD_COLUMNS} FROM threads
                 WHERE user_a = ?1 OR user_b = ?1
                 ORDER BY updated_at DESC, id DESC"
            ))
            .map_err(db_err("prepare threads query"))?;

        let rows = stmt
            .query_map([user], thread_from_row)
            .map_err(db_err("query threads"))?;

        let mut threads = Vec::new();
        for row in rows {
            threads.push(row.map_err(db_err("read thread row"))?);
        }
        Ok(threads)
    }

    fn do_user_in_thread(conn: &Connection, user: UserId, thread: ThreadId) -> ChatResult<bool> {
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM threads WHERE id = ?1 AND (user_a = ?2 OR user_b = ?2))",
            params![thread, user],
            |row| row.get(0),
        )
        .map_err(db_err("check thread membership"))
    }

    fn do_touch(conn: &Connection, thread: ThreadId, now: i64) -> ChatResult<usize> {
        conn.execute(
            "UPDATE threads SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
            params![thread, now],
        )
        .map_err(db_err("touch thread"))
    }

    fn do_append(
        conn: &Connection,
        thread: ThreadId,
        sender: UserId,
        text: &str,
        attachment: Option<MediaId>,
        now: i64,
    ) -> ChatResult<ChatMessage> {
        if text.trim().is_empty() && attachment.is_none() {
            return Err(ChatError::EmptyMessage);
        }

        let tx = conn
            .unchecked_transaction()
            .map_err(db_err("begin append"))?;

        // Touch first so a missing thread aborts before anything is written.
        if Self::do_touch(&tx, thread, now)? == 0 {
            return Err(ChatError::NotFound);
        }

        tx.execute(
            "INSERT INTO messages (thread_id, sender_id, body, attachment_id, created_at, is_read)
             VALUES (?1, ?2, ?3, ?4, ?5, 0)",
            params![thread, sender, text, attachment, now],
        )
        .map_err(db_err("insert message"))?;
        let id: MessageId = tx.last_insert_rowid();

        tx.commit().map_err(db_err("commit append"))?;

        Ok(ChatMessage {
            id,
            thread_id: thread,
            sender_id: sender,
            text: text.to_string(),
            attachment,
            created_at: now,
            is_read: false,
        })
    }

    fn do_latest(conn: &Connection, thread: ThreadId, limit: u32) -> ChatResult<Vec<ChatMessage>> {
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages
                 WHERE thread_id = ?1
                 ORDER BY created_at DESC, id DESC
                 LIMIT ?2"
            ))
            .map_err(db_err("prepare messages query"))?;

        let rows = stmt
            .query_map(params![thread, limit], message_from_row)
            .map_err(db_err("query messages"))?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row.map_err(db_err("read message row"))?);
        }
        messages.reverse();
        Ok(messages)
    }

    fn do_mark_read_except(conn: &Connection, thread: ThreadId, reader: UserId) -> ChatResult<usize> {
        conn.execute(
            "UPDATE messages SET is_read = 1
             WHERE thread_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![thread, reader],
        )
        .map_err(db_err("mark read"))
    }

    fn do_unread_for_user(conn: &Connection, user: UserId) -> ChatResult<u32> {
        conn.query_row(
            "SELECT COUNT(*) FROM messages m
             JOIN threads t ON t.id = m.thread_id
             WHERE (t.user_a = ?1 OR t.user_b = ?1)
               AND m.sender_id <> ?1
               AND m.is_read = 0",
            [user],
            |row| row.get(0),
        )
        .map_err(db_err("count unread"))
    }

    fn do_unread_in_thread(conn: &Connection, thread: ThreadId, reader: UserId) -> ChatResult<u32> {
        conn.query_row(
            "SELECT COUNT(*) FROM messages
             WHERE thread_id = ?1 AND sender_id <> ?2 AND is_read = 0",
            params![thread, reader],
            |row| row.get(0),
        )
        .map_err(db_err("count thread unread"))
    }

    fn do_identity(conn: &Connection, id: UserId) -> ChatResult<Option<Identity>> {
        conn.query_row(
            &format!("SELECT {IDENTITY_COLUMNS} FROM identities WHERE id = ?1"),
            [id],
            identity_from_row,
        )
        .optional()
        .map_err(db_err("load identity"))
    }

    fn do_find_identity(conn: &Connection, login: &str, email: &str) -> ChatResult<Option<Identity>> {
        conn.query_row(
            &format!(
                "SELECT {IDENTITY_COLUMNS} FROM identities
                 WHERE login = ?1 OR (?2 <> '' AND email = ?2)
                 ORDER BY login = ?1 DESC, id ASC
                 LIMIT 1"
            ),
            params![login, email],
            identity_from_row,
        )
        .optional()
        .map_err(db_err("find identity"))
    }

    fn do_create_identity(conn: &Connection, new: &NewIdentity) -> ChatResult<Identity> {
        let roles = serde_json::to_string(&new.roles)
            .map_err(|e| ChatError::Storage(format!("encode roles: {e}")))?;
        let inserted = conn.execute(
            "INSERT INTO identities (login, display_name, email, roles, is_admin, managed_by, credential)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new.login,
                new.display_name,
                new.email,
                roles,
                new.is_admin as i32,
                new.managed_by,
                new.credential,
            ],
        );

        match inserted {
            Ok(_) => Ok(Identity {
                id: conn.last_insert_rowid(),
                login: new.login.clone(),
                display_name: new.display_name.clone(),
                email: new.email.clone(),
                roles: new.roles.clone(),
                is_admin: new.is_admin,
                managed_by: new.managed_by,
            }),
            Err(e) if is_constraint_violation(&e) => {
                log::debug!("Identity {:?} already exists, reusing it", new.login);
                Self::do_find_identity(conn, &new.login, "")?.ok_or_else(|| {
                    ChatError::Storage(format!("identity {:?} missing after conflict", new.login))
                })
            }
            Err(e) => Err(db_err("insert identity")(e)),
        }
    }

    fn do_role_exists(conn: &Connection, name: &str) -> ChatResult<bool> {
        conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM role_catalog WHERE name = ?1)",
            [name],
            |row| row.get(0),
        )
        .map_err(db_err("check role catalog"))
    }

    fn do_register_role(conn: &Connection, name: &str) -> ChatResult<()> {
        conn.execute("INSERT OR IGNORE INTO role_catalog (name) VALUES (?1)", [name])
            .map_err(db_err("register role"))?;
        Ok(())
    }

    fn do_insert_media(
        conn: &Connection,
        file_name: &str,
        mime_type: &str,
        size: u64,
        now: i64,
    ) -> ChatResult<MediaId> {
        conn.execute(
            "INSERT INTO media (file_name, mime_type, size, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![file_name, mime_type, size as i64, now],
        )
        .map_err(db_err("insert media"))?;
        Ok(conn.last_insert_rowid())
    }

    fn do_media(conn: &Connection, id: MediaId) -> ChatResult<Option<MediaRecord>> {
        conn.query_row(
            "SELECT id, file_name, mime_type, size, created_at FROM media WHERE id = ?1",
            [id],
            |row| {
                Ok(MediaRecord {
                    id: row.get(0)?,
                    file_name: row.get(1)?,
                    mime_type: row.get(2)?,
                    size: row.get::<_, i64>(3)? as u64,
                    created_at: row.get(4)?,
                })
            },
        )
        .optional()
        .map_err(db_err("load media"))
    }

    fn do_delete_media(conn: &Connection, id: MediaId) -> ChatResult<Option<MediaRecord>> {
        let Some(record) = Self::do_media(conn, id)? else {
            return Ok(None);
        };
        conn.execute("DELETE FROM media WHERE id = ?1", [id])
            .map_err(db_err("delete media"))?;
        Ok(Some(record))
    }
}

fn ordered(a: UserId, b: UserId) -> (UserId, UserId) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _) if err.code == ErrorCode::ConstraintViolation
    )
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: row.get(0)?,
        user_a: row.get(1)?,
        user_b: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    Ok(ChatMessage {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender_id: row.get(2)?,
        text: row.get(3)?,
        attachment: row.get(4)?,
        created_at: row.get(5)?,
        is_read: row.get::<_, i32>(6)? != 0,
    })
}

fn identity_from_row(row: &Row<'_>) -> rusqlite::Result<Identity> {
    let roles: String = row.get(4)?;
    let roles: Vec<String> = serde_json::from_str(&roles)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(4, Type::Text, Box::new(e)))?;
    Ok(Identity {
        id: row.get(0)?,
        login: row.get(1)?,
        display_name: row.get(2)?,
        email: row.get(3)?,
        roles,
        is_admin: row.get::<_, i32>(5)? != 0,
        managed_by: row.get(6)?,
    })
}
