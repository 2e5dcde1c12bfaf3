use std::sync::Arc;

use crate::{
    accounts::AccountService,
    config::Config,
    credentials::CredentialIssuer,
    db::Database,
    invitation::{InvitationConsumer, InvitationValidator},
    profile::ProfileService,
};

#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub config: Config,
    pub validator: Arc<InvitationValidator>,
    pub consumer: InvitationConsumer,
    pub issuer: CredentialIssuer,
    pub accounts: AccountService,
    pub profiles: ProfileService,
}

impl AppState {
    pub fn new(db: Database, config: Config) -> Self {
        let validator = Arc::new(InvitationValidator::new(db.clone()));
        let consumer = InvitationConsumer::new(db.clone());
        let issuer = CredentialIssuer::new(db.clone(), &config.auth);
        let accounts = AccountService::new(
            db.clone(),
            validator.clone(),
            issuer.clone(),
            config.auth.min_password_length,
        );
        let profiles = ProfileService::new(db.clone(), issuer.clone());

        Self {
            db,
            config,
            validator,
            consumer,
            issuer,
            accounts,
            profiles,
        }
    }
}
