#![allow(dead_code)]

use actix_web::{
    App, Error,
    body::MessageBody,
    dev::{ServiceFactory, ServiceRequest, ServiceResponse},
    test,
};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use edumanage::auth::jwt::generate_access_token;
use edumanage::config::Config;
use edumanage::model::role::Role;
use edumanage::notify::{MailError, Mailer, OutgoingEmail};
use edumanage::routes::{self, AppState};
use edumanage::service::{AccountService, AttendanceService};
use edumanage::store::LocalStore;
use edumanage::utils::email_cache::EmailCache;

/// Keeps every message; optionally refuses to deliver.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<OutgoingEmail>>,
    pub fail: bool,
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: &OutgoingEmail) -> Result<(), MailError> {
        if self.fail {
            return Err(MailError::Address(email.to.clone()));
        }
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

impl RecordingMailer {
    /// Token carried by the link in the most recent message.
    pub fn last_token(&self) -> String {
        let sent = self.sent.lock().unwrap();
        let html = &sent.last().expect("no mail sent").html;
        let start = html.find("token=").expect("no token in mail") + "token=".len();
        html[start..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric())
            .collect()
    }
}

pub struct Harness {
    pub store: Arc<LocalStore>,
    pub mailer: Arc<RecordingMailer>,
    pub config: Config,
    pub state: AppState,
}

/// Class C1 "Grade 5" with Ada (S1), Ben (S2), Cy (S3); class C2 "Grade 6" with Dee (S4).
pub async fn seeded_store() -> Arc<LocalStore> {
    let store = Arc::new(LocalStore::in_memory());
    let teacher = store.add_teacher("Ms. Okafor", Some("Science")).await.unwrap();
    let c1 = store.add_class("Grade 5", Some(&teacher), Some("Room 4")).await.unwrap();
    let c2 = store.add_class("Grade 6", None, None).await.unwrap();
    let parent = store.add_parent("Mr. Lind", None).await.unwrap();
    store.add_student("Ada", Some(&c1), Some(&parent)).await.unwrap();
    store.add_student("Ben", Some(&c1), None).await.unwrap();
    store.add_student("Cy", Some(&c1), None).await.unwrap();
    store.add_student("Dee", Some(&c2), None).await.unwrap();
    store.add_subject("Biology", Some(&c1), Some(&teacher)).await.unwrap();
    store
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: "integration-secret".to_string(),
        store_timeout: Duration::from_secs(2),
        ..Config::default()
    }
}

pub async fn harness() -> Harness {
    harness_with(test_config(), RecordingMailer::default()).await
}

pub async fn harness_with(config: Config, mailer: RecordingMailer) -> Harness {
    let store = seeded_store().await;
    let mailer = Arc::new(mailer);
    let attendance = AttendanceService::new(store.clone(), config.store_timeout, config.roster_policy);
    let accounts = AccountService::new(
        store.clone(),
        mailer.clone(),
        EmailCache::default(),
        config.clone(),
    );
    let state = AppState::new(config.clone(), attendance, accounts);
    Harness {
        store,
        mailer,
        config,
        state,
    }
}

impl Harness {
    pub fn app(
        &self,
    ) -> App<
        impl ServiceFactory<
            ServiceRequest,
            Config = (),
            Response = ServiceResponse<impl MessageBody + use<>>,
            Error = Error,
            InitError = (),
        > + use<>,
    > {
        let state = self.state.clone();
        App::new().configure(move |cfg| routes::configure(cfg, &state))
    }

    pub fn token(&self, role: Role) -> String {
        generate_access_token(
            "U100",
            &format!("{role}@school.org"),
            role,
            &self.config.jwt_secret,
            3_600,
        )
        .unwrap()
    }
}

pub fn peer() -> SocketAddr {
    "10.1.2.3:40000".parse().unwrap()
}

pub fn get(uri: &str) -> test::TestRequest {
    test::TestRequest::get().uri(uri).peer_addr(peer())
}

pub fn post(uri: &str) -> test::TestRequest {
    test::TestRequest::post().uri(uri).peer_addr(peer())
}

pub fn put(uri: &str) -> test::TestRequest {
    test::TestRequest::put().uri(uri).peer_addr(peer())
}

pub fn bearer(token: &str) -> (&'static str, String) {
    ("Authorization", format!("Bearer {token}"))
}
