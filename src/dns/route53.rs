use std::{future::Future, time::Duration};
use aws_config::SdkConfig;
use aws_sdk_route53::Client;
use aws_sdk_route53::error::SdkError;
use aws_sdk_route53::operation::change_resource_record_sets::ChangeResourceRecordSetsError;
use aws_sdk_route53::operation::list_resource_record_sets::ListResourceRecordSetsError;
use aws_sdk_route53::types::{
    Change, ChangeAction, ChangeBatch, ResourceRecord, ResourceRecordSet, RrType,
};
use thiserror::Error;
use tokio::time;
use super::{Provider, RecordType, DEFAULT_TIMEOUT, DEFAULT_TTL};

#[derive(Debug, Clone)]
pub struct Route53Provider {
    hosted_zone_id: String,
    client: Client,

    ttl: i64,
    timeout: Duration,
}

impl Route53Provider {
    pub fn new(config: &SdkConfig, hosted_zone_id: String) -> Self {
        Self {
            hosted_zone_id,
            client: Client::new(config),
            ttl: DEFAULT_TTL.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn ttl_mut(&mut self) -> &mut i64 {
        &mut self.ttl
    }
    pub fn timeout_mut(&mut self) -> &mut Duration {
        &mut self.timeout
    }

    fn change_batch(&self, name: &str, value: &str, record_type: RecordType) -> ChangeBatch {
        ChangeBatch::builder()
            .changes(Change::builder()
                .action(ChangeAction::Upsert)
                .resource_record_set(ResourceRecordSet::builder()
                    .name(name)
                    .r#type(rr_type(record_type))
                    .resource_records(ResourceRecord::builder()
                        .value(value)
                        .build())
                    .ttl(self.ttl)
                    .build())
                .build()
            )
            .build()
    }

    async fn bounded<T, E, F>(&self, fut: F) -> Result<T, Route53Error>
    where
        F: Future<Output = Result<T, E>>,
        Route53Error: From<E>,
    {
        match time::timeout(self.timeout, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(Route53Error::Timeout(self.timeout)),
        }
    }
}

#[async_trait::async_trait]
impl Provider for Route53Provider {
    type Error = Route53Error;

    #[tracing::instrument(skip(self), level = "debug")]
    async fn get(&self, name: &str, record_type: RecordType) -> Result<Vec<String>, Self::Error> {
        let wanted = rr_type(record_type);
        let mut values = Vec::new();
        let mut start_identifier = None;

        loop {
            let page = self.bounded(self.client.list_resource_record_sets()
                .hosted_zone_id(self.hosted_zone_id.clone())
                .start_record_name(name)
                .start_record_type(wanted.clone())
                .set_start_record_identifier(start_identifier.take())
                .send()
            ).await?;

            let sets = page.resource_record_sets().unwrap_or_default();
            values.extend(matching_values(sets, name, &wanted));

            // Listing is ordered, so once the next key leaves name/type nothing else can match.
            let next_is_same_set = page.next_record_name()
                .is_some_and(|n| super::same_name(n, name))
                && page.next_record_type() == Some(&wanted);
            if !page.is_truncated() || !next_is_same_set {
                break;
            }
            match page.next_record_identifier() {
                Some(id) => start_identifier = Some(id.to_owned()),
                None => break,
            }
        }

        Ok(values)
    }

    #[tracing::instrument(skip(self), level = "debug")]
    async fn set(
        &self,
        name: &str,
        value: &str,
        record_type: RecordType,
    ) -> Result<(), Self::Error> {
        self.bounded(self.client.change_resource_record_sets()
            .hosted_zone_id(self.hosted_zone_id.clone())
            .change_batch(self.change_batch(name, value, record_type))
            .send()
        ).await?;

        Ok(())
    }
}

/// Values of the record sets that are exactly `name`/`record_type`.
///
/// The listing API returns everything at or after the start key, so siblings,
/// children and other types show up in the same page.
fn matching_values(sets: &[ResourceRecordSet], name: &str, record_type: &RrType) -> Vec<String> {
    sets.iter()
        .filter(|r| {
            r.name().is_some_and(|n| super::same_name(n, name)) && r.r#type() == Some(record_type)
        })
        .flat_map(|r| r.resource_records().unwrap_or_default())
        .filter_map(|v| v.value().map(ToOwned::to_owned))
        .collect()
}

fn rr_type(record_type: RecordType) -> RrType {
    match record_type {
        RecordType::A => RrType::A,
        RecordType::Aaaa => RrType::Aaaa,
        RecordType::Ptr => RrType::Ptr,
    }
}

#[derive(Debug, Error)]
pub enum Route53Error {
    #[error(transparent)]
    ChangeSetsError(#[from] SdkError<ChangeResourceRecordSetsError>),
    #[error(transparent)]
    ListSetsError(#[from] SdkError<ListResourceRecordSetsError>),
    #[error("route53 request timed out after {0:?}")]
    Timeout(Duration),
}
