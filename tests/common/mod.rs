//! Shared fixtures for the myth-forge integration suite: an in-memory store,
//! scripted generation providers and identity tokens.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use myth_forge::{
    auth::{IdentityClaims, JwtIdentityVerifier},
    database::{
        children::{Child, UpsertChildRequest},
        create_memory_pool, DbPool,
    },
    forge::{ChapterForge, RetryPolicy},
    generation::{
        AvatarGenerator, AvatarRequest, GeneratedImage, GeneratedMyth, GenerationError,
        ImageGenerator, ImageRequest, MythRequest, MythResult, ProviderError, StorageError,
        TextGenerator,
    },
    server::AppState,
};

pub const JWT_SECRET: &[u8] = b"integration-test-secret";
pub const USER: &str = "user-alice";
pub const OTHER_USER: &str = "user-bob";

pub fn token_for(user_id: &str) -> String {
    let claims = IdentityClaims {
        sub: user_id.to_string(),
        exp: Utc::now().timestamp() + 3600,
        iss: None,
        aud: None,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(JWT_SECRET)).unwrap()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Script {
    Succeed,
    /// Fail the first `n` calls with a retryable upstream error
    FailFirst(usize),
    FailAlways,
}

impl Script {
    fn should_fail(&self, call: usize) -> bool {
        match *self {
            Script::Succeed => false,
            Script::FailFirst(n) => call < n,
            Script::FailAlways => true,
        }
    }
}

pub struct FakeText {
    script: Script,
    calls: AtomicUsize,
    pub last_request: Mutex<Option<MythRequest>>,
}

impl FakeText {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TextGenerator for FakeText {
    async fn generate_myth(&self, request: &MythRequest) -> Result<GeneratedMyth, ProviderError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if self.script.should_fail(call) {
            return Err(ProviderError::Status {
                provider: "fake-text",
                status: 503,
            });
        }

        Ok(GeneratedMyth {
            myth: MythResult {
                title: "The Patio Sea".to_string(),
                story: format!("{} found a tiny ocean in the patio.", request.child_name),
                tags: vec!["water".to_string(), "play".to_string()],
            },
            provider_meta: json!({"provider": "fake-text"}),
        })
    }
}

pub struct FakeImages {
    script: Script,
    calls: AtomicUsize,
    pub last_request: Mutex<Option<ImageRequest>>,
}

impl FakeImages {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            calls: AtomicUsize::new(0),
            last_request: Mutex::new(None),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerator for FakeImages {
    async fn generate_image(
        &self,
        request: &ImageRequest,
    ) -> Result<GeneratedImage, GenerationError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if self.script.should_fail(call) {
            return Err(StorageError::Rejected {
                path: format!("{}/genimg/fake.png", request.user_id),
                status: 503,
            }
            .into());
        }

        Ok(GeneratedImage {
            image_url: format!("https://cdn.test/{}/genimg/{}.png", request.user_id, call),
            provider_meta: json!({"provider": "fake-image", "prompt": request.prompt}),
        })
    }
}

#[derive(Default)]
pub struct FakeAvatars {
    pub last_request: Mutex<Option<AvatarRequest>>,
}

#[async_trait]
impl AvatarGenerator for FakeAvatars {
    async fn generate_avatar(
        &self,
        request: &AvatarRequest,
    ) -> Result<GeneratedImage, GenerationError> {
        *self.last_request.lock().unwrap() = Some(request.clone());
        Ok(GeneratedImage {
            image_url: format!("https://cdn.test/{}/avatar/new.png", request.user_id),
            provider_meta: json!({"provider": "fake-avatar"}),
        })
    }
}

pub struct TestContext {
    pub db: DbPool,
    pub text: Arc<FakeText>,
    pub images: Arc<FakeImages>,
    pub avatars: Arc<FakeAvatars>,
    pub forge: ChapterForge,
}

impl TestContext {
    pub async fn new() -> Self {
        Self::with_scripts(Script::Succeed, Script::Succeed, RetryPolicy::default()).await
    }

    pub async fn with_scripts(text: Script, images: Script, retry: RetryPolicy) -> Self {
        let db = create_memory_pool().await.expect("in-memory pool");
        let text = Arc::new(FakeText::new(text));
        let images = Arc::new(FakeImages::new(images));

        let forge = ChapterForge::new(
            db.clone(),
            Arc::clone(&text) as Arc<dyn TextGenerator>,
            Arc::clone(&images) as Arc<dyn ImageGenerator>,
        )
        .with_retry(retry);

        Self {
            db,
            text,
            images,
            avatars: Arc::new(FakeAvatars::default()),
            forge,
        }
    }

    pub fn app_state(&self, with_avatars: bool) -> AppState {
        AppState {
            db: self.db.clone(),
            forge: Arc::new(self.forge.clone()),
            avatars: with_avatars
                .then(|| Arc::clone(&self.avatars) as Arc<dyn AvatarGenerator>),
            identity: Arc::new(JwtIdentityVerifier::from_secret(JWT_SECRET, None, None)),
        }
    }

    pub async fn create_child(&self, user_id: &str, name: &str) -> Child {
        self.create_child_with(
            user_id,
            UpsertChildRequest {
                name: name.to_string(),
                ..Default::default()
            },
        )
        .await
    }

    pub async fn create_child_with(&self, user_id: &str, request: UpsertChildRequest) -> Child {
        Child::upsert(&self.db, request, user_id)
            .await
            .expect("child created")
    }

    pub async fn chapter_count(&self) -> i64 {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM chapters")
            .fetch_one(&self.db)
            .await
            .unwrap()
    }
}
