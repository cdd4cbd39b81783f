use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use tempfile::TempDir;

use deskchat::core::api::{Action, ChatEndpoint, Session, TokenIssuer};
use deskchat::core::directory::Directory;
use deskchat::core::finance::{DirectoryFinanceProvider, FinanceAccount, FinanceProvider};
use deskchat::core::media::{FsMediaStore, MediaStore};
use deskchat::core::models::{
    Identity, MediaId, MessagePayload, NewIdentity, ThreadTarget, Upload, UserId,
};
use deskchat::core::roles::{COLLABORATOR_LABEL, COORDINATOR_LABEL, FINANCE_LABEL, INSTITUTION_LABEL};
use deskchat::core::service::{MessagingService, ServiceSettings};
use deskchat::core::store::StoreHandle;
use deskchat::core::{ChatError, ChatResult};

struct Fixture {
    store: StoreHandle,
    service: Arc<MessagingService>,
    media_dir: TempDir,
    finance: UserId,
}

fn finance_account() -> FinanceAccount {
    FinanceAccount {
        login: "finance".into(),
        email: "finance@portal.example.org".into(),
        display_name: "Finance".into(),
    }
}

async fn fixture() -> Fixture {
    fixture_with(None, ServiceSettings::default()).await
}

async fn fixture_with(media: Option<Arc<dyn MediaStore>>, settings: ServiceSettings) -> Fixture {
    let store = StoreHandle::open_in_memory().unwrap();
    for role in [FINANCE_LABEL, INSTITUTION_LABEL, COORDINATOR_LABEL, COLLABORATOR_LABEL] {
        store.register_role(role).await.unwrap();
    }

    let media_dir = tempfile::tempdir().unwrap();
    let media: Arc<dyn MediaStore> = match media {
        Some(media) => media,
        None => Arc::new(
            FsMediaStore::new(media_dir.path(), "https://portal.example.org/media", store.clone())
                .unwrap(),
        ),
    };

    let directory: Arc<dyn Directory> = Arc::new(store.clone());
    let provider = DirectoryFinanceProvider::new(directory.clone(), finance_account());
    let finance = provider.resolve().await.unwrap().unwrap().id;

    let service = MessagingService::new(store.clone(), directory, media, Arc::new(provider), settings);
    Fixture {
        store,
        service: Arc::new(service),
        media_dir,
        finance,
    }
}

impl Fixture {
    async fn user(&self, login: &str, role: &str, managed_by: Option<UserId>) -> Identity {
        let name = format!("{}{}", login[..1].to_uppercase(), &login[1..]);
        self.store
            .create_identity(NewIdentity {
                login: login.into(),
                display_name: name,
                email: format!("{login}@example.org"),
                roles: vec![role.into()],
                is_admin: false,
                managed_by,
                credential: "x".into(),
            })
            .await
            .unwrap()
    }

    async fn send(&self, from: UserId, target: ThreadTarget, text: &str) -> ChatResult<MessagePayload> {
        let ctx = self.service.begin(from, false).await?;
        self.service.send_message(&ctx, target, text, None).await
    }

    async fn unread(&self, user: UserId, as_finance: bool) -> u32 {
        let ctx = self.service.begin(user, as_finance).await.unwrap();
        self.service.unread_count(&ctx).await.unwrap()
    }

    fn stored_files(&self) -> usize {
        std::fs::read_dir(self.media_dir.path())
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

fn png(bytes: usize) -> Upload {
    Upload {
        file_name: "receipt.png".into(),
        content_type: "image/png".into(),
        bytes: vec![7; bytes],
    }
}

#[tokio::test]
async fn opening_the_finance_channel_creates_an_empty_thread() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;

    let ctx = fx.service.begin(c.id, false).await.unwrap();
    let conversation = fx
        .service
        .fetch_messages(&ctx, ThreadTarget::Contact(fx.finance))
        .await
        .unwrap();

    assert!(conversation.thread_id > 0);
    assert!(conversation.messages.is_empty());
    assert_eq!(conversation.contact.user_id, fx.finance);
    assert_eq!(conversation.contact.role, FINANCE_LABEL);
}

#[tokio::test]
async fn message_round_trip_between_provider_and_finance() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;

    let sent = fx
        .send(c.id, ThreadTarget::Contact(fx.finance), "Olá")
        .await
        .unwrap();
    assert!(sent.is_own);
    assert_eq!(sent.text, "Olá");
    assert_eq!(sent.attachment_url, "");

    assert_eq!(fx.unread(fx.finance, true).await, 1);
    assert_eq!(fx.unread(c.id, false).await, 0);

    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();
    let fin_ctx = fx.service.begin(fx.finance, true).await.unwrap();
    let seen = fx
        .service
        .fetch_messages(&fin_ctx, ThreadTarget::Thread(thread.id))
        .await
        .unwrap();

    assert_eq!(seen.messages.len(), 1);
    assert!(!seen.messages[0].is_own);
    assert_eq!(seen.contact.user_id, c.id);
    assert_eq!(fx.unread(fx.finance, true).await, 0);
    assert_eq!(fx.unread(c.id, false).await, 0);

    // Bumping the thread happens with the insert.
    let stored = fx.store.latest(thread.id, 10).await.unwrap();
    let thread = fx.store.thread(thread.id).await.unwrap().unwrap();
    assert!(thread.updated_at >= stored[0].created_at);
}

#[tokio::test]
async fn finance_reply_counts_as_unread_for_the_provider() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    fx.send(c.id, ThreadTarget::Contact(fx.finance), "invoice 12?")
        .await
        .unwrap();

    let fin_ctx = fx.service.begin(fx.finance, true).await.unwrap();
    let reply = fx
        .service
        .send_message(&fin_ctx, ThreadTarget::Contact(c.id), "paid", None)
        .await
        .unwrap();
    assert!(reply.is_own);

    assert_eq!(fx.unread(c.id, false).await, 1);
    let ctx = fx.service.begin(c.id, false).await.unwrap();
    let contacts = fx.service.list_contacts(&ctx, None).await.unwrap();
    assert_eq!(contacts.len(), 1);
    assert_eq!(contacts[0].unread, 1);

    let thread_id = contacts[0].thread_id;
    assert_eq!(fx.service.mark_read(&ctx, thread_id).await.unwrap(), 1);
    assert_eq!(fx.service.mark_read(&ctx, thread_id).await.unwrap(), 0);
    assert_eq!(fx.unread(c.id, false).await, 0);
}

#[tokio::test]
async fn empty_messages_are_rejected_without_a_row() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;

    let err = fx
        .send(c.id, ThreadTarget::Contact(fx.finance), "   ")
        .await
        .unwrap_err();
    assert_eq!(err, ChatError::EmptyMessage);

    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();
    assert!(fx.store.latest(thread.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn pdf_uploads_are_refused_before_anything_is_stored() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let ctx = fx.service.begin(c.id, false).await.unwrap();

    let pdf = Upload {
        file_name: "invoice.pdf".into(),
        content_type: "application/pdf".into(),
        bytes: b"%PDF-1.7".to_vec(),
    };
    let err = fx
        .service
        .send_message(&ctx, ThreadTarget::Contact(fx.finance), "see attached", Some(pdf))
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::UnsupportedAttachment(_)));
    assert_eq!(fx.stored_files(), 0);
    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();
    assert!(fx.store.latest(thread.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn image_only_message_gets_a_url() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let ctx = fx.service.begin(c.id, false).await.unwrap();

    let sent = fx
        .service
        .send_message(&ctx, ThreadTarget::Contact(fx.finance), "", Some(png(16)))
        .await
        .unwrap();

    assert_eq!(sent.text, "");
    assert!(sent.attachment_url.starts_with("https://portal.example.org/media/"));
    assert_eq!(fx.stored_files(), 1);
}

#[tokio::test]
async fn oversized_attachments_are_rejected() {
    let settings = ServiceSettings {
        max_attachment_bytes: 8,
        ..ServiceSettings::default()
    };
    let fx = fixture_with(None, settings).await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let ctx = fx.service.begin(c.id, false).await.unwrap();

    let err = fx
        .service
        .send_message(&ctx, ThreadTarget::Contact(fx.finance), "", Some(png(9)))
        .await
        .unwrap_err();
    assert_eq!(err, ChatError::AttachmentTooLarge { size: 9, limit: 8 });
    assert_eq!(fx.stored_files(), 0);
}

struct StalledMedia;

#[async_trait]
impl MediaStore for StalledMedia {
    async fn store(&self, _upload: &Upload, _mime: &str) -> ChatResult<MediaId> {
        tokio::time::sleep(Duration::from_secs(30)).await;
        Ok(1)
    }

    async fn url(&self, _id: MediaId) -> ChatResult<Option<String>> {
        Ok(None)
    }

    async fn discard(&self, _id: MediaId) -> ChatResult<()> {
        Ok(())
    }
}

#[tokio::test]
async fn slow_media_storage_fails_the_send_as_retryable() {
    let settings = ServiceSettings {
        upload_timeout: Duration::from_millis(50),
        ..ServiceSettings::default()
    };
    let fx = fixture_with(Some(Arc::new(StalledMedia)), settings).await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let ctx = fx.service.begin(c.id, false).await.unwrap();

    let err = fx
        .service
        .send_message(&ctx, ThreadTarget::Contact(fx.finance), "photo", Some(png(4)))
        .await
        .unwrap_err();

    assert!(err.is_retryable());
    assert_eq!(err.status_code(), 503);
    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();
    assert!(fx.store.latest(thread.id, 10).await.unwrap().is_empty());
}

/// Hands out a media id with no row behind it, so the message insert fails.
#[derive(Default)]
struct DanglingMedia {
    discarded: std::sync::Mutex<Vec<MediaId>>,
}

#[async_trait]
impl MediaStore for DanglingMedia {
    async fn store(&self, _upload: &Upload, _mime: &str) -> ChatResult<MediaId> {
        Ok(999)
    }

    async fn url(&self, _id: MediaId) -> ChatResult<Option<String>> {
        Ok(None)
    }

    async fn discard(&self, id: MediaId) -> ChatResult<()> {
        self.discarded.lock().unwrap().push(id);
        Ok(())
    }
}

#[tokio::test]
async fn media_is_discarded_when_the_message_insert_fails() {
    let media = Arc::new(DanglingMedia::default());
    let stored: Arc<dyn MediaStore> = media.clone();
    let fx = fixture_with(Some(stored), ServiceSettings::default()).await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let ctx = fx.service.begin(c.id, false).await.unwrap();

    let err = fx
        .service
        .send_message(&ctx, ThreadTarget::Contact(fx.finance), "photo", Some(png(4)))
        .await
        .unwrap_err();

    assert!(matches!(err, ChatError::Storage(_)));
    assert_eq!(*media.discarded.lock().unwrap(), vec![999]);
    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();
    assert!(fx.store.latest(thread.id, 10).await.unwrap().is_empty());
}

#[tokio::test]
async fn concurrent_openers_converge_on_one_thread() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let c_ctx = fx.service.begin(c.id, false).await.unwrap();
    let f_ctx = fx.service.begin(fx.finance, true).await.unwrap();

    let attempts = (0..8).map(|i| {
        let service = fx.service.clone();
        let (ctx, other) = if i % 2 == 0 {
            (&c_ctx, fx.finance)
        } else {
            (&f_ctx, c.id)
        };
        async move { service.get_or_create_thread(ctx, other).await }
    });
    let threads: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|r| r.unwrap().id)
        .collect();

    assert!(threads.windows(2).all(|w| w[0] == w[1]));
}

#[tokio::test]
async fn coordinators_reach_only_collaborators_they_manage() {
    let fx = fixture().await;
    let k = fx.user("kim", COORDINATOR_LABEL, None).await;
    let managed = fx.user("mia", COLLABORATOR_LABEL, Some(k.id)).await;
    let stranger = fx.user("noah", COLLABORATOR_LABEL, None).await;
    let k_ctx = fx.service.begin(k.id, false).await.unwrap();

    assert!(fx.service.get_or_create_thread(&k_ctx, managed.id).await.is_ok());
    assert_eq!(
        fx.service.get_or_create_thread(&k_ctx, stranger.id).await,
        Err(ChatError::ThreadCreationDenied {
            actor: k.id,
            target: stranger.id
        })
    );

    // Collaborators never originate with each other.
    let m_ctx = fx.service.begin(managed.id, false).await.unwrap();
    assert!(matches!(
        fx.service.get_or_create_thread(&m_ctx, stranger.id).await,
        Err(ChatError::ThreadCreationDenied { .. })
    ));
    assert_eq!(
        fx.service.get_or_create_thread(&m_ctx, 9_999).await,
        Err(ChatError::NotFound)
    );
}

#[tokio::test]
async fn outsiders_cannot_read_a_thread() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let d = fx.user("dan", COLLABORATOR_LABEL, None).await;
    fx.send(c.id, ThreadTarget::Contact(fx.finance), "private")
        .await
        .unwrap();
    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();

    let d_ctx = fx.service.begin(d.id, false).await.unwrap();
    assert_eq!(
        fx.service
            .fetch_messages(&d_ctx, ThreadTarget::Thread(thread.id))
            .await,
        Err(ChatError::NotFound)
    );
    assert_eq!(
        fx.service
            .send_message(&d_ctx, ThreadTarget::Thread(thread.id), "hi", None)
            .await,
        Err(ChatError::NotFound)
    );
    assert_eq!(
        fx.service.mark_read(&d_ctx, thread.id).await,
        Err(ChatError::NotFound)
    );
}

#[tokio::test]
async fn finance_dashboard_is_recent_first_and_searchable() {
    let fx = fixture().await;
    let alice = fx.user("alice", COLLABORATOR_LABEL, None).await;
    let bob = fx.user("bob", INSTITUTION_LABEL, None).await;

    fx.send(alice.id, ThreadTarget::Contact(fx.finance), "one")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    fx.send(bob.id, ThreadTarget::Contact(fx.finance), "two")
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    fx.send(alice.id, ThreadTarget::Contact(fx.finance), "three")
        .await
        .unwrap();

    let ctx = fx.service.begin(fx.finance, true).await.unwrap();
    let all = fx.service.list_contacts(&ctx, None).await.unwrap();
    let order: Vec<_> = all.iter().map(|c| (c.identity.id, c.unread)).collect();
    assert_eq!(order, vec![(alice.id, 2), (bob.id, 1)]);
    assert!(all.iter().all(|c| c.to_payload().can_message));

    let found = fx.service.list_contacts(&ctx, Some("ALI")).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].identity.id, alice.id);

    let by_email = fx.service.list_contacts(&ctx, Some("bob@")).await.unwrap();
    assert_eq!(by_email.len(), 1);
    assert_eq!(by_email[0].role_label, INSTITUTION_LABEL);
}

#[tokio::test]
async fn finance_view_requires_the_finance_role() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;

    assert_eq!(
        fx.service.begin(c.id, true).await.err(),
        Some(ChatError::Forbidden)
    );
    assert_eq!(
        fx.service.begin(424_242, false).await.err(),
        Some(ChatError::Forbidden)
    );
}

struct MissingFinance;

#[async_trait]
impl FinanceProvider for MissingFinance {
    async fn resolve(&self) -> ChatResult<Option<Identity>> {
        Ok(None)
    }
}

#[tokio::test]
async fn missing_finance_identity_is_reported_not_hidden() {
    let store = StoreHandle::open_in_memory().unwrap();
    let dir = tempfile::tempdir().unwrap();
    let directory: Arc<dyn Directory> = Arc::new(store.clone());
    let media = FsMediaStore::new(dir.path(), "https://portal.example.org/media", store.clone()).unwrap();
    let service = MessagingService::new(
        store.clone(),
        directory,
        Arc::new(media),
        Arc::new(MissingFinance),
        ServiceSettings::default(),
    );
    let c = store
        .create_identity(NewIdentity {
            login: "carla".into(),
            display_name: "Carla".into(),
            email: "carla@example.org".into(),
            roles: vec![COLLABORATOR_LABEL.into()],
            is_admin: false,
            managed_by: None,
            credential: "x".into(),
        })
        .await
        .unwrap();

    let ctx = service.begin(c.id, false).await.unwrap();
    assert_eq!(
        service.list_contacts(&ctx, None).await,
        Err(ChatError::FinanceChannelUnavailable)
    );
    assert_eq!(
        service.unread_count(&ctx).await,
        Ok(0),
        "flows that do not touch the finance channel keep working"
    );
}

// -- JSON boundary -----------------------------------------------------------

#[tokio::test]
async fn json_endpoint_wraps_results_and_errors() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    let endpoint = ChatEndpoint::new(fx.service.clone(), TokenIssuer::new("test-secret"));
    let session = Session {
        id: "sess-c".into(),
        user_id: Some(c.id),
    };
    let send_token = endpoint.token_for(&session, Action::SendMessage).unwrap();

    let ok = endpoint
        .handle(
            &session,
            Action::SendMessage,
            &send_token,
            json!({ "contact_id": fx.finance, "text": "Olá" }),
            None,
        )
        .await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.body["success"], json!(true));
    assert_eq!(ok.body["data"]["is_own"], json!(true));

    // A token for one action does not unlock another.
    let wrong = endpoint
        .handle(&session, Action::UnreadCount, &send_token, json!({}), None)
        .await;
    assert_eq!(wrong.status, 403);
    assert_eq!(wrong.body["success"], json!(false));

    let empty = endpoint
        .handle(
            &session,
            Action::SendMessage,
            &send_token,
            json!({ "contact_id": fx.finance, "text": "" }),
            None,
        )
        .await;
    assert_eq!(empty.status, 400);
    assert_eq!(empty.body["data"]["code"], json!("empty_message"));

    let unknown = endpoint
        .handle(
            &session,
            Action::SendMessage,
            &send_token,
            json!({ "contact_id": fx.finance, "text": "x", "sender_id": 1 }),
            None,
        )
        .await;
    assert_eq!(unknown.status, 400);
    assert_eq!(unknown.body["data"]["code"], json!("invalid_request"));

    let anonymous = Session {
        id: "sess-anon".into(),
        user_id: None,
    };
    let anon_token = endpoint.token_for(&anonymous, Action::UnreadCount).unwrap();
    let denied = endpoint
        .handle(&anonymous, Action::UnreadCount, &anon_token, json!({}), None)
        .await;
    assert_eq!(denied.status, 403);
}

#[tokio::test]
async fn json_endpoint_reports_unread_and_mark_read() {
    let fx = fixture().await;
    let c = fx.user("carla", COLLABORATOR_LABEL, None).await;
    fx.send(c.id, ThreadTarget::Contact(fx.finance), "hello")
        .await
        .unwrap();
    let thread = fx.store.find_thread(c.id, fx.finance).await.unwrap().unwrap();

    let endpoint = ChatEndpoint::new(fx.service.clone(), TokenIssuer::new("test-secret"));
    let desk = Session {
        id: "sess-f".into(),
        user_id: Some(fx.finance),
    };
    let unread_token = endpoint.token_for(&desk, Action::UnreadCount).unwrap();
    let read_token = endpoint.token_for(&desk, Action::MarkRead).unwrap();

    let before = endpoint
        .handle(&desk, Action::UnreadCount, &unread_token, json!({ "as_finance": true }), None)
        .await;
    assert_eq!(before.body["data"], json!(1));

    let marked = endpoint
        .handle(
            &desk,
            Action::MarkRead,
            &read_token,
            json!({ "thread_id": thread.id, "as_finance": true }),
            None,
        )
        .await;
    assert_eq!(marked.status, 200);
    assert_eq!(marked.body["data"]["marked"], json!(1));

    let after = endpoint
        .handle(&desk, Action::UnreadCount, &unread_token, json!({ "as_finance": true }), None)
        .await;
    assert_eq!(after.body["data"], json!(0));
}
