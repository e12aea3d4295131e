use std::sync::{Arc, Mutex};

use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use magnetplay::backend::{Backend, BackendClient};
use magnetplay::player::{PlayerError, PlayerEventHandler, PlayerFactory, PlayerResource};
use magnetplay::session::Sources;
use magnetplay::{
    ControllerError, NoticeLevel, Outcome, PlaybackController, PlaybackMode, PlaybackState,
    PlaybackTarget, SessionEvent, SessionObserver,
};

const MAGNET: &str = "abc123";

/// Keeps the video URL of every live player.
#[derive(Clone, Default)]
struct LiveFactory {
    live: Arc<Mutex<Vec<String>>>,
}

struct LivePlayer {
    video: String,
    live: Arc<Mutex<Vec<String>>>,
}

impl PlayerFactory for LiveFactory {
    fn create(&self, sources: &Sources) -> Result<Box<dyn PlayerResource>, PlayerError> {
        self.live.lock().unwrap().push(sources.video.clone());
        Ok(Box::new(LivePlayer {
            video: sources.video.clone(),
            live: Arc::clone(&self.live),
        }))
    }
}

impl PlayerResource for LivePlayer {
    fn on_event(&mut self, _handler: PlayerEventHandler) {}

    fn dispose(&mut self) -> Result<(), PlayerError> {
        self.live.lock().unwrap().retain(|v| v != &self.video);
        Ok(())
    }
}

#[derive(Default)]
struct Titles(Mutex<Vec<(NoticeLevel, String)>>);

impl SessionObserver for Titles {
    fn name(&self) -> &str {
        "titles"
    }

    fn on_event(&self, event: &SessionEvent) {
        if let SessionEvent::Notice(notice) = event {
            self.0
                .lock()
                .unwrap()
                .push((notice.level, notice.title.clone()));
        }
    }
}

async fn mount_ok(server: &MockServer, verb: &str, route: String) {
    Mock::given(method(verb))
        .and(path(route))
        .respond_with(ResponseTemplate::new(200))
        .mount(server)
        .await;
}

async fn mount_files(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/metadata/{}", MAGNET)))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"[{"key": "0", "name": "ep1.mkv"}, {"key": "1", "name": "ep2.mkv"}]"#,
        ))
        .mount(server)
        .await;
}

fn controller(
    server: &MockServer,
) -> (PlaybackController<BackendClient, LiveFactory>, LiveFactory) {
    let factory = LiveFactory::default();
    let controller = PlaybackController::new(
        BackendClient::with_base_url(&server.uri()),
        factory.clone(),
        MAGNET,
    );
    (controller, factory)
}

#[tokio::test]
async fn test_browse_then_stop_file() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", format!("/add/{}", MAGNET)).await;
    mount_files(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/deselect/{}/1", MAGNET)))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;

    let (controller, factory) = controller(&server);
    let titles = Arc::new(Titles::default());
    controller.subscribe(titles.clone());

    controller.submit_magnet().await.unwrap();
    assert_eq!(
        *factory.live.lock().unwrap(),
        vec![format!("{}/stream/{}", server.uri(), MAGNET)]
    );

    controller.request_file_list().await.unwrap();
    controller.play_file_in_browser("1").unwrap();
    assert_eq!(
        *factory.live.lock().unwrap(),
        vec![format!("{}/streamfile/{}/1", server.uri(), MAGNET)]
    );

    let outcome = controller.stop_file("1").await.unwrap();
    assert_eq!(outcome, Outcome::Applied);

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Listed);
    assert!(snapshot.video_source.is_none());
    assert!(factory.live.lock().unwrap().is_empty());
    assert_eq!(
        titles.0.lock().unwrap().last().unwrap().0,
        NoticeLevel::Success
    );
}

#[tokio::test]
async fn test_stop_file_clears_state_on_backend_error() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", format!("/add/{}", MAGNET)).await;
    mount_files(&server).await;
    Mock::given(method("GET"))
        .and(path(format!("/deselect/{}/0", MAGNET)))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let (controller, factory) = controller(&server);
    controller.submit_magnet().await.unwrap();
    controller.request_file_list().await.unwrap();
    controller.play_file_in_browser("0").unwrap();

    let err = controller.stop_file("0").await.unwrap_err();
    assert!(matches!(err, ControllerError::Backend(_)));

    let snapshot = controller.snapshot();
    assert!(snapshot.selected.is_none());
    assert!(snapshot.video_source.is_none());
    assert!(factory.live.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_play_file_externally_sends_stream_url() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", format!("/add/{}", MAGNET)).await;
    mount_files(&server).await;

    let stream_url = format!("{}/streamfile/{}/0", server.uri(), MAGNET);
    Mock::given(method("GET"))
        .and(path("/stream-to-vlc"))
        .and(query_param("url", stream_url.as_str()))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (controller, _) = controller(&server);
    controller.submit_magnet().await.unwrap();
    controller.request_file_list().await.unwrap();

    controller.play_file_externally("0").await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(
        snapshot.state,
        PlaybackState::Playing {
            mode: PlaybackMode::External,
            target: PlaybackTarget::File("0".into())
        }
    );
    assert_eq!(snapshot.external.unwrap().stream_url, stream_url);
}

#[tokio::test]
async fn test_play_before_add_makes_no_request() {
    let server = MockServer::start().await;
    mount_files(&server).await;
    Mock::given(method("GET"))
        .and(path("/stream-to-vlc"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let (controller, factory) = controller(&server);
    controller.request_file_list().await.unwrap();

    assert!(matches!(
        controller.play_file_in_browser("0"),
        Err(ControllerError::NotAdded)
    ));
    assert!(matches!(
        controller.play_file_externally("0").await,
        Err(ControllerError::NotAdded)
    ));
    assert!(factory.live.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_remove_torrent_resets_session() {
    let server = MockServer::start().await;
    mount_ok(&server, "GET", format!("/add/{}", MAGNET)).await;
    mount_files(&server).await;
    Mock::given(method("DELETE"))
        .and(path(format!("/remove/{}", MAGNET)))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let (controller, factory) = controller(&server);
    controller.submit_magnet().await.unwrap();
    controller.request_file_list().await.unwrap();

    controller.remove_torrent().await.unwrap();

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Idle);
    assert!(snapshot.files.is_empty());
    assert!(!snapshot.added);
    assert!(factory.live.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_backend_down_reports_notice() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(format!("/metadata/{}", MAGNET)))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;

    let (controller, _) = controller(&server);
    let titles = Arc::new(Titles::default());
    controller.subscribe(titles.clone());

    assert!(controller.request_file_list().await.is_err());
    assert!(controller.check_health().await.is_err());

    let titles = titles.0.lock().unwrap();
    assert_eq!(
        titles[0],
        (
            NoticeLevel::Error,
            "Backend is not running on your local machine".to_string()
        )
    );
    assert_eq!(
        titles[1],
        (NoticeLevel::Error, "Backend is not running".to_string())
    );
    assert_eq!(controller.snapshot().state, PlaybackState::Idle);
    assert_eq!(
        controller.backend().stream_url(MAGNET),
        format!("{}/stream/{}", server.uri(), MAGNET)
    );
}
