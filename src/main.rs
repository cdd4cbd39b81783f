use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};

use deskchat::app::{self, LocalBackend, SessionHandle};
use deskchat::config::Config;
use deskchat::core::api::{ChatEndpoint, Session, TokenIssuer};
use deskchat::core::directory::Directory;
use deskchat::core::finance::DirectoryFinanceProvider;
use deskchat::core::media::FsMediaStore;
use deskchat::core::mime::mime_from_ext;
use deskchat::core::models::Upload;
use deskchat::core::roles::{COLLABORATOR_LABEL, COORDINATOR_LABEL, FINANCE_LABEL, INSTITUTION_LABEL};
use deskchat::core::service::MessagingService;
use deskchat::core::store::StoreHandle;
use deskchat::ui;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() {
    env_logger::init();

    if let Err(e) = run().await {
        log::error!("{e}");
        eprintln!("deskchat: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), BoxError> {
    let config = Config::resolve()?;
    let viewer = config
        .viewer
        .ok_or("set DESKCHAT_USER_ID to the id of the user to chat as")?;

    let store = StoreHandle::open(&config.db_path)?;
    for role in [FINANCE_LABEL, INSTITUTION_LABEL, COORDINATOR_LABEL, COLLABORATOR_LABEL] {
        store.register_role(role).await?;
    }

    let directory: Arc<dyn Directory> = Arc::new(store.clone());
    let media = FsMediaStore::new(&config.media_dir, &config.media_base_url, store.clone())?;
    let finance = DirectoryFinanceProvider::new(directory.clone(), config.finance.clone());
    let service = MessagingService::new(
        store,
        directory,
        Arc::new(media),
        Arc::new(finance),
        config.service.clone(),
    );
    let endpoint = Arc::new(ChatEndpoint::new(
        Arc::new(service),
        TokenIssuer::new(config.token_secret.clone()),
    ));

    let session = Session {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: Some(viewer),
    };
    let backend = LocalBackend::new(endpoint, session, config.as_finance);
    let handle = app::start(Arc::new(backend), config.sync);

    let threshold = config.sync.scroll_threshold;
    let mut updates = handle.subscribe();
    let printer = tokio::spawn(async move {
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            println!("{}", ui::render(&state, threshold));
            if state.closed {
                break;
            }
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        if !run_command(&handle, line.trim()).await {
            break;
        }
    }

    handle.close();
    let _ = printer.await;
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn run_command(handle: &SessionHandle, line: &str) -> bool {
    let (command, rest) = line.split_once(' ').unwrap_or((line, ""));
    let rest = rest.trim();

    match command {
        "" => {}
        "/quit" => return false,
        "/close" => handle.close_conversation(),
        "/search" => handle.set_search(rest),
        "/open" => match rest.parse() {
            Ok(user_id) => handle.open_contact(user_id),
            Err(_) => eprintln!("usage: /open <user_id>"),
        },
        "/thread" => match rest.parse() {
            Ok(thread_id) => handle.open_thread(thread_id),
            Err(_) => eprintln!("usage: /thread <id>"),
        },
        "/scroll" => match rest.parse() {
            Ok(offset) => handle.scrolled(offset),
            Err(_) => eprintln!("usage: /scroll <pixels from bottom>"),
        },
        "/attach" => {
            let (path, caption) = rest.split_once(' ').unwrap_or((rest, ""));
            if path.is_empty() {
                eprintln!("usage: /attach <path> [caption]");
                return true;
            }
            match read_upload(Path::new(path)).await {
                Ok(upload) => send(handle, caption.trim(), Some(upload)).await,
                Err(e) => eprintln!("cannot read {path}: {e}"),
            }
        }
        _ if command.starts_with('/') => eprintln!("unknown command {command}"),
        _ => send(handle, line, None).await,
    }
    true
}

async fn send(handle: &SessionHandle, text: &str, upload: Option<Upload>) {
    if let Err(e) = handle.send(text, upload).await {
        eprintln!("! {}", e.user_message());
    }
}

async fn read_upload(path: &Path) -> std::io::Result<Upload> {
    let bytes = tokio::fs::read(path).await?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(Upload {
        file_name,
        content_type: mime_from_ext(path).to_string(),
        bytes,
    })
}
