//! The entry point tying metadata, transport and batching together.
//!
//! # Example
//! ```ignore
//! use std::sync::Arc;
//! use sitegraph_orm::prelude::*;
//!
//! let context = Context::new(Arc::new(catalog), Arc::new(transport))
//!     .with_token("hostname", "contoso.sharepoint.com")
//!     .with_token("serverrelativepath", "/sites/dev");
//!
//! let web = context.resource("SP.Web")?;
//! context
//!     .load(&web, &[field("Title"), expand_with("Lists", [field("Title")])])
//!     .await?;
//!
//! for list in web.many("Lists")? {
//!     println!("{}", list.get("Title")?);
//! }
//! ```

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::sync::Arc;

use sitegraph_client::{CorrelationId, RequestDescriptor, Transport};
use sitegraph_schema::{
    Cardinality, PathKind, PathVars, Protocol, ProtocolSet, ResourceMetadataProvider,
};
use tap::TapFallible;
use tracing::{debug, instrument, warn};

use crate::batch::{BatchCoordinator, BatchItem, BatchSummary, Commit, Operation, Stage};
use crate::mapper::{apply, check_conflicts, surface_item_failures, Mapper, MappingOverrides};
use crate::options::ContextOptions;
use crate::protocol;
use crate::query::Query;
use crate::request::RequestNode;
use crate::resource::Resource;
use crate::selector::Selector;
use crate::translate::render_projection;
use crate::{OrmError, OrmResult};

/// Shared runtime state for one site or tenant.
///
/// Clones share the catalog, transport, mapping overrides and batch scope.
#[derive(Clone)]
pub struct Context {
    pub(crate) catalog: Arc<dyn ResourceMetadataProvider>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) batch: Arc<BatchCoordinator>,
    pub(crate) overrides: Arc<MappingOverrides>,
    pub(crate) tokens: BTreeMap<String, String>,
    pub(crate) options: ContextOptions,
}

impl Context {
    /// Options come from the environment (see [`ContextOptions::from_env`]).
    pub fn new(catalog: Arc<dyn ResourceMetadataProvider>, transport: Arc<dyn Transport>) -> Self {
        Self {
            catalog,
            batch: Arc::new(BatchCoordinator::new(transport.clone())),
            transport,
            overrides: Arc::new(MappingOverrides::new()),
            tokens: BTreeMap::new(),
            options: ContextOptions::from_env(),
        }
    }

    /// Value for a `{name}` placeholder of root path templates.
    pub fn with_token(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tokens.insert(name.into(), value.into());
        self
    }

    pub fn with_options(mut self, options: ContextOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_overrides(mut self, overrides: MappingOverrides) -> Self {
        self.overrides = Arc::new(overrides);
        self
    }

    pub fn options(&self) -> &ContextOptions {
        &self.options
    }

    pub fn catalog(&self) -> &dyn ResourceMetadataProvider {
        self.catalog.as_ref()
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// A root instance addressed through its `Root` path templates.
    pub fn resource(&self, resource_type: &str) -> OrmResult<Resource> {
        let ty = self.catalog.require(resource_type)?;
        Ok(Resource::new(resource_type, ty.key_field(), None))
    }

    /// A root instance at an explicit address.
    pub fn resource_at(
        &self,
        resource_type: &str,
        protocol: Protocol,
        path: impl Into<String>,
    ) -> OrmResult<Resource> {
        let resource = self.resource(resource_type)?;
        resource.lock().addresses.insert(protocol, path.into());
        Ok(resource)
    }

    /// Address of `resource` for `protocol`, if it can be built.
    ///
    /// Children are addressed below their parent: collection members through
    /// the `ByKey` template, single-valued relations by appending the wire name.
    pub fn address(&self, resource: &Resource, protocol: Protocol) -> Option<String> {
        let (resource_type, parent, key) = {
            let state = resource.lock();
            if let Some(path) = state.addresses.get(&protocol) {
                return Some(path.clone());
            }
            let key = match protocol {
                Protocol::Graph => state
                    .bag
                    .metadata()
                    .graph_id
                    .clone()
                    .or_else(|| state.key().and_then(|k| k.key_string())),
                Protocol::Rest => state.key().and_then(|k| k.key_string()),
            };
            (
                state.bag.resource_type().to_string(),
                state.parent.clone(),
                key,
            )
        };

        let Some(link) = parent else {
            let template = self.catalog.path_for(&resource_type, protocol, PathKind::Root)?;
            return template
                .render(PathVars::new().tokens(&self.tokens))
                .tap_err(|e| debug!("{} not addressable over {}: {}", resource_type, protocol, e))
                .ok();
        };

        let parent = Resource::from_weak(&link.resource)?;
        let parent_address = self.address(&parent, protocol)?;
        let def = self.catalog.field(&parent.resource_type(), &link.relation)?;
        let wire = def.wire_name(protocol)?;
        match def.relation()?.1 {
            Cardinality::One => Some(format!("{}/{}", parent_address.trim_end_matches('/'), wire)),
            Cardinality::Many => {
                let key = key?;
                let template = self.catalog.path_for(&resource_type, protocol, PathKind::ByKey)?;
                template
                    .render(PathVars::new().parent(&parent_address).key(&key).tokens(&self.tokens))
                    .ok()
            }
        }
    }

    /// Addresses of `resource` for every protocol that can reach it.
    pub(crate) fn addresses(&self, resource: &Resource) -> HashMap<Protocol, String> {
        Protocol::ALL
            .into_iter()
            .filter_map(|p| self.address(resource, p).map(|a| (p, a)))
            .collect()
    }

    /// Path of the collection behind `relation` of `parent`.
    pub(crate) fn collection_path(&self, parent: &Resource, relation: &str, protocol: Protocol) -> Option<String> {
        let def = self.catalog.field(&parent.resource_type(), relation)?;
        let wire = def.wire_name(protocol)?;
        let (target, _) = def.relation()?;
        let parent_address = self.address(parent, protocol)?;
        match self.catalog.path_for(target, protocol, PathKind::Collection) {
            Some(template) => template
                .render(PathVars::new().parent(&parent_address).tokens(&self.tokens))
                .ok(),
            None => Some(format!("{}/{}", parent_address.trim_end_matches('/'), wire)),
        }
    }

    /// Path of a top-level collection of `resource_type`.
    pub(crate) fn root_collection_path(&self, resource_type: &str, protocol: Protocol) -> Option<String> {
        self.catalog
            .path_for(resource_type, protocol, PathKind::Collection)?
            .render(PathVars::new().tokens(&self.tokens))
            .ok()
    }

    /// True when the field is loaded or the relation requested. Never fetches.
    pub fn is_property_available(&self, resource: &Resource, name: &str) -> bool {
        resource.is_property_available(name)
    }

    fn load_operation(&self, resource: &Resource, selectors: &[Selector]) -> OrmResult<Operation<()>> {
        resource.lock().ensure_live()?;
        let resource_type = resource.resource_type();
        let node = RequestNode::build(self.catalog.as_ref(), &resource_type, selectors)?;

        let addresses = self.addresses(resource);
        if addresses.is_empty() {
            return Err(OrmError::usage(format!(
                "{} instance has no address for REST or Graph",
                resource_type
            )));
        }
        let addressable: ProtocolSet = addresses.keys().copied().collect();
        let parts = protocol::split(
            self.catalog.as_ref(),
            &node,
            self.options.graph_first,
            addressable,
            resource.key().is_some(),
        )?;

        let correlation_id = CorrelationId::new();
        let descriptors: Vec<RequestDescriptor> = parts
            .iter()
            .map(|(protocol, part)| {
                render_projection(self.catalog.as_ref(), part, *protocol)
                    .into_iter()
                    .fold(
                        RequestDescriptor::get(correlation_id, *protocol, &addresses[protocol]),
                        |d, (name, value)| d.with_param(name, value),
                    )
            })
            .collect();

        let context = self.clone();
        let target = resource.clone();
        let stage: Stage<()> = Box::new(move |results| {
            let mut staged = Vec::with_capacity(parts.len());
            for ((protocol, part), result) in parts.iter().zip(results) {
                let doc = result?;
                let mapper = Mapper::new(context.catalog.as_ref(), &context.overrides, *protocol);
                staged.push(mapper.stage_instance(part, &doc)?);
            }
            let policy = context.options.conflict_policy;
            let commit: Commit<()> = Box::new(move || {
                check_conflicts(staged.iter().map(|s| (&target, s)), policy)?;
                for s in &staged {
                    apply(&target, s, policy)?;
                }
                surface_item_failures(&target.resource_type(), &staged)
            });
            Ok(commit)
        });

        Ok(Operation::new(format!("load {}", resource_type), descriptors, stage))
    }

    /// Fetch the selected fields and relations of `resource` now.
    ///
    /// No selectors loads the type's default fields. Loading is monotonic:
    /// fields loaded earlier stay available.
    #[instrument(
        name = "sitegraph.context.load",
        skip(self, resource, selectors),
        fields(resource_type = %resource.resource_type()),
        err
    )]
    pub async fn load(&self, resource: &Resource, selectors: &[Selector]) -> OrmResult<()> {
        let operation = self.load_operation(resource, selectors)?;
        self.batch.run(operation).await
    }

    /// Queue a load in the open batch.
    pub fn load_batch(&self, resource: &Resource, selectors: &[Selector]) -> OrmResult<BatchItem<()>> {
        let operation = self.load_operation(resource, selectors)?;
        self.batch.enqueue(operation)
    }

    /// Query over a collection relation of `parent`.
    pub fn query(&self, parent: &Resource, relation: &str) -> OrmResult<Query> {
        let resource_type = parent.resource_type();
        let def = self
            .catalog
            .field(&resource_type, relation)
            .ok_or_else(|| OrmError::usage(format!("{} has no field `{}`", resource_type, relation)))?;
        match def.relation() {
            Some((target, Cardinality::Many)) => Ok(Query::over_relation(
                self.clone(),
                parent.clone(),
                relation,
                target,
            )),
            _ => Err(OrmError::usage(format!(
                "`{}` of {} is not a collection relation",
                relation, resource_type
            ))),
        }
    }

    /// Query over a top-level collection (e.g. `teams`).
    pub fn query_root(&self, resource_type: &str) -> OrmResult<Query> {
        self.catalog.require(resource_type)?;
        Ok(Query::over_root(self.clone(), resource_type))
    }

    /// Open a batch scope. Fails with `Usage` when one is already open.
    pub fn begin_batch(&self) -> OrmResult<()> {
        self.batch.begin()
    }

    pub fn has_open_batch(&self) -> bool {
        self.batch.is_open()
    }

    /// Send every queued operation in one round trip.
    pub async fn execute_batch(&self) -> OrmResult<BatchSummary> {
        self.batch
            .execute()
            .await
            .tap_err(|e| warn!("batch finished with errors: {}", e))
    }

    /// Execute the open batch unless `cancel` completes first.
    pub async fn execute_batch_until<F>(&self, cancel: F) -> OrmResult<BatchSummary>
    where
        F: Future<Output = ()>,
    {
        self.batch.execute_until(cancel).await
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("tokens", &self.tokens)
            .field("options", &self.options)
            .field("batch", &self.batch)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bag::Origin;
    use crate::testing::{fixture_context, LIST_ID};
    use pretty_assertions::assert_eq;
    use sitegraph_client::testing::MockTransport;

    #[test]
    fn test_root_and_child_addresses() {
        let context = fixture_context(Arc::new(MockTransport::new()));
        let web = context.resource("SP.Web").unwrap();
        assert_eq!(context.address(&web, Protocol::Rest).as_deref(), Some("_api/web"));
        assert_eq!(
            context.address(&web, Protocol::Graph).as_deref(),
            Some("sites/contoso.sharepoint.com:/sites/dev:")
        );

        let list = Resource::new("SP.List", "Id", Some((&web, "Lists")));
        assert_eq!(context.address(&list, Protocol::Rest), None);
        list.lock()
            .bag
            .set("Id", uuid::Uuid::parse_str(LIST_ID).unwrap().into(), Origin::FromServer)
            .unwrap();
        assert_eq!(
            context.address(&list, Protocol::Rest),
            Some(format!("_api/web/lists(guid'{}')", LIST_ID))
        );
        assert_eq!(
            context.address(&list, Protocol::Graph),
            Some(format!("sites/contoso.sharepoint.com:/sites/dev:/lists/{}", LIST_ID))
        );
        assert_eq!(
            context.collection_path(&web, "Lists", Protocol::Rest).as_deref(),
            Some("_api/web/lists")
        );
    }

    #[test]
    fn test_unknown_type_is_usage_error() {
        let context = fixture_context(Arc::new(MockTransport::new()));
        assert!(matches!(context.resource("SP.Nope"), Err(OrmError::Usage(_))));
        let web = context.resource("SP.Web").unwrap();
        assert!(matches!(context.query(&web, "Title"), Err(OrmError::Usage(_))));
    }

    #[test]
    fn test_explicit_address_wins() {
        let context = fixture_context(Arc::new(MockTransport::new()));
        let web = context
            .resource_at("SP.Web", Protocol::Rest, "_api/site/rootweb")
            .unwrap();
        assert_eq!(
            context.address(&web, Protocol::Rest).as_deref(),
            Some("_api/site/rootweb")
        );
    }
}
