//! Deferred queries over collections.
//!
//! A [`Query`] describes what to fetch and does nothing until realized with
//! [`to_list`](Query::to_list), [`first_or_default`](Query::first_or_default)
//! or [`get_by_key`](Query::get_by_key). Refinements return new handles and
//! never change the handle they are called on.
//!
//! Predicates and ordering the chosen protocol cannot express are evaluated
//! over the fetched page; see [`LocalPaging`](crate::options::LocalPaging)
//! for how much is fetched in that case.
//!
//! # Example
//! ```ignore
//! let lists = context
//!     .query(&web, "Lists")?
//!     .where_(Predicate::eq("Hidden", false))
//!     .load(&[field("Title"), field("ItemCount")])
//!     .order_by("Title")
//!     .to_list()
//!     .await?;
//! ```

use std::cmp::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use sitegraph_client::{CorrelationId, Document, RequestDescriptor, TransportError};
use sitegraph_schema::{PathKind, PathVars, Protocol, ProtocolSet, Value};
use tracing::{debug, instrument, trace};

use crate::batch::{BatchItem, Commit, Operation, Stage};
use crate::context::Context;
use crate::mapper::{
    materialize, merge_into_collection, next_link, surface_item_failures, Mapper, StagedInstance,
};
use crate::predicate::{Predicate, Row};
use crate::protocol;
use crate::request::RequestNode;
use crate::resource::Resource;
use crate::selector::Selector;
use crate::translate::{key_filter, render_projection, translate_collection, Translation};
use crate::{OrmError, OrmResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub field: String,
    pub direction: OrderDirection,
}

impl OrderBy {
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Filter, ordering and window of a query.
#[derive(Debug, Clone, Default)]
pub struct QuerySpec {
    pub predicate: Option<Predicate>,
    pub order: Vec<OrderBy>,
    pub top: Option<usize>,
    pub skip: Option<usize>,
}

impl Row for Resource {
    fn value(&self, field: &str) -> Option<Value> {
        self.get(field).ok()
    }
}

#[derive(Debug, Clone)]
enum Source {
    Relation { parent: Resource, relation: String },
    Root,
}

#[derive(Debug, Clone)]
struct Materialized {
    items: Vec<Resource>,
    /// No server page was left unread.
    complete: bool,
}

/// Everything needed to issue and interpret one collection request.
#[derive(Debug, Clone)]
struct Plan {
    protocol: Protocol,
    node: RequestNode,
    translation: Translation,
}

/// A lazily evaluated collection query.
#[derive(Debug, Clone)]
pub struct Query {
    context: Context,
    source: Source,
    resource_type: String,
    selectors: Vec<Selector>,
    spec: QuerySpec,
    cache: Arc<Mutex<Option<Materialized>>>,
}

impl Query {
    pub(crate) fn over_relation(context: Context, parent: Resource, relation: &str, target: &str) -> Self {
        Self::new(
            context,
            Source::Relation {
                parent,
                relation: relation.to_string(),
            },
            target,
        )
    }

    pub(crate) fn over_root(context: Context, resource_type: &str) -> Self {
        Self::new(context, Source::Root, resource_type)
    }

    fn new(context: Context, source: Source, resource_type: &str) -> Self {
        Self {
            context,
            source,
            resource_type: resource_type.to_string(),
            selectors: Vec::new(),
            spec: QuerySpec::default(),
            cache: Arc::new(Mutex::new(None)),
        }
    }

    fn refine(&self, change: impl FnOnce(&mut Query)) -> Query {
        let mut next = self.clone();
        next.cache = Arc::new(Mutex::new(None));
        change(&mut next);
        next
    }

    fn cache(&self) -> MutexGuard<'_, Option<Materialized>> {
        self.cache.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Add a condition, combined with existing ones by `and`.
    pub fn where_(&self, predicate: Predicate) -> Query {
        self.refine(|q| {
            q.spec.predicate = Some(match q.spec.predicate.take() {
                Some(existing) => existing.and(predicate),
                None => predicate,
            })
        })
    }

    /// Fields and relations to fetch for each member. Accumulates.
    pub fn load(&self, selectors: &[Selector]) -> Query {
        self.refine(|q| q.selectors.extend_from_slice(selectors))
    }

    pub fn order_by(&self, field: impl Into<String>) -> Query {
        let order = OrderBy::asc(field);
        self.refine(|q| q.spec.order.push(order))
    }

    pub fn order_by_desc(&self, field: impl Into<String>) -> Query {
        let order = OrderBy::desc(field);
        self.refine(|q| q.spec.order.push(order))
    }

    pub fn take(&self, count: usize) -> Query {
        self.refine(|q| q.spec.top = Some(count))
    }

    pub fn skip(&self, count: usize) -> Query {
        self.refine(|q| q.spec.skip = Some(count))
    }

    /// The request tree of the selected members.
    fn node(&self) -> OrmResult<RequestNode> {
        RequestNode::build(self.context.catalog.as_ref(), &self.resource_type, &self.selectors)
    }

    /// `node` plus whatever the filter and ordering read, so they can be
    /// evaluated locally.
    fn with_referenced(&self, mut node: RequestNode) -> OrmResult<RequestNode> {
        let catalog = self.context.catalog.as_ref();
        let referenced = self
            .spec
            .predicate
            .iter()
            .flat_map(Predicate::fields)
            .chain(self.spec.order.iter().map(|o| o.field.clone()));
        for field in referenced {
            let def = catalog.field(&self.resource_type, &field).ok_or_else(|| {
                OrmError::usage(format!("{} has no field `{}`", self.resource_type, field))
            })?;
            if def.is_relation() {
                return Err(OrmError::usage(format!(
                    "cannot filter or order {} by relation `{}`",
                    self.resource_type, field
                )));
            }
            node.push_field(&field);
        }
        Ok(node)
    }

    fn collection_path(&self, protocol: Protocol) -> Option<String> {
        match &self.source {
            Source::Relation { parent, relation } => {
                self.context.collection_path(parent, relation, protocol)
            }
            Source::Root => self.context.root_collection_path(&self.resource_type, protocol),
        }
    }

    fn plan(&self, spec: &QuerySpec) -> OrmResult<Plan> {
        let catalog = self.context.catalog.as_ref();
        let selected = self.node()?;
        let referenced = self.with_referenced(selected.clone())?;
        let paths: Vec<(Protocol, String)> = Protocol::ALL
            .into_iter()
            .filter_map(|p| self.collection_path(p).map(|path| (p, path)))
            .collect();
        if paths.is_empty() {
            return Err(OrmError::usage(format!(
                "no collection path for {} over REST or Graph",
                self.resource_type
            )));
        }
        let addressable: ProtocolSet = paths.iter().map(|(p, _)| *p).collect();
        // the protocol must serve the filter and ordering too
        let protocol = protocol::single(catalog, &referenced, self.context.options.graph_first, addressable)?;
        let path = paths
            .into_iter()
            .find(|(p, _)| *p == protocol)
            .map(|(_, path)| path)
            .unwrap_or_default();

        let translate = |node: &RequestNode| {
            translate_collection(
                catalog,
                CorrelationId::new(),
                protocol,
                &path,
                node,
                spec,
                self.context.options.local_paging,
            )
        };
        // fields read by the filter or ordering are fetched only when they
        // are evaluated here
        let translation = translate(&selected);
        let (node, translation) = if translation.local_filter.is_some() || translation.local_order {
            let translation = translate(&referenced);
            (referenced, translation)
        } else {
            (selected, translation)
        };
        Ok(Plan {
            protocol,
            node,
            translation,
        })
    }

    /// Fetch (if not already done for this handle) and return the matching members.
    #[instrument(
        name = "sitegraph.query.to_list",
        skip(self),
        fields(resource_type = %self.resource_type),
        err
    )]
    pub async fn to_list(&self) -> OrmResult<Vec<Resource>> {
        if let Some(cached) = self.cache().as_ref() {
            trace!("query over {} answered from its materialization", self.resource_type);
            return Ok(cached.items.clone());
        }

        let plan = self.plan(&self.spec)?;
        let descriptor = plan.translation.descriptor.clone();
        let first: Document = self.context.batch.run(fetch(&self.resource_type, descriptor)).await?;

        let mut pages = vec![first];
        if self.context.options.local_paging.is_exhaustive() {
            while let Some(link) = pages.last().and_then(next_link) {
                debug!("following next link of {} query", self.resource_type);
                let request = RequestDescriptor::get(CorrelationId::new(), plan.protocol, link);
                pages.push(self.context.transport.send(&request).await?);
            }
        }

        let (staged, failures, complete) = self.stage_pages(&plan, &pages)?;
        self.commit(&plan, &staged, failures, complete)
    }

    /// Queue the query in the open batch. Only the first page is fetched.
    pub fn to_list_batch(&self) -> OrmResult<BatchItem<Vec<Resource>>> {
        if let Some(cached) = self.cache().as_ref() {
            return Ok(BatchItem::ready("query (cached)", Ok(cached.items.clone())));
        }
        let plan = self.plan(&self.spec)?;
        let descriptor = plan.translation.descriptor.clone();
        let query = self.clone();
        let stage: Stage<Vec<Resource>> = Box::new(move |mut results| {
            let doc = results.remove(0)?;
            let (staged, failures, complete) = query.stage_pages(&plan, std::slice::from_ref(&doc))?;
            let commit: Commit<Vec<Resource>> =
                Box::new(move || query.commit(&plan, &staged, failures, complete));
            Ok(commit)
        });
        self.context.batch.enqueue(Operation::new(
            format!("query {}", self.resource_type),
            vec![descriptor],
            stage,
        ))
    }

    /// First member matching `predicate` (and the query's own filter).
    ///
    /// Answered from this handle's materialization when it is complete and
    /// carries every field the predicate reads; otherwise queried.
    pub async fn first_or_default(&self, predicate: Option<Predicate>) -> OrmResult<Option<Resource>> {
        if let Some(found) = self.first_from_cache(predicate.as_ref()) {
            return Ok(found);
        }
        let refined = match predicate {
            Some(p) => self.where_(p),
            None => self.clone(),
        }
        .take(1);
        Ok(refined.to_list().await?.into_iter().next())
    }

    /// Queue a first-match query in the open batch.
    pub fn first_or_default_batch(&self, predicate: Option<Predicate>) -> OrmResult<BatchItem<Option<Resource>>> {
        if let Some(found) = self.first_from_cache(predicate.as_ref()) {
            return Ok(BatchItem::ready("first (cached)", Ok(found)));
        }
        let refined = match predicate {
            Some(p) => self.where_(p),
            None => self.clone(),
        }
        .take(1);
        let plan = refined.plan(&refined.spec)?;
        let descriptor = plan.translation.descriptor.clone();
        let stage: Stage<Option<Resource>> = Box::new(move |mut results| {
            let doc = results.remove(0)?;
            let (staged, failures, complete) = refined.stage_pages(&plan, std::slice::from_ref(&doc))?;
            let commit: Commit<Option<Resource>> = Box::new(move || {
                Ok(refined
                    .commit(&plan, &staged, failures, complete)?
                    .into_iter()
                    .next())
            });
            Ok(commit)
        });
        self.context.batch.enqueue(Operation::new(
            format!("first {}", self.resource_type),
            vec![descriptor],
            stage,
        ))
    }

    /// `Some(answer)` when the cache can answer, `None` when a query is needed.
    fn first_from_cache(&self, predicate: Option<&Predicate>) -> Option<Option<Resource>> {
        let cache = self.cache();
        let cached = cache.as_ref().filter(|c| c.complete)?;
        let fields = predicate.map(Predicate::fields).unwrap_or_default();
        let resolved = cached
            .items
            .iter()
            .all(|item| fields.iter().all(|f| item.is_property_available(f)));
        if !resolved {
            return None;
        }
        trace!("first match over {} answered locally", self.resource_type);
        Some(
            cached
                .items
                .iter()
                .find(|item| predicate.map_or(true, |p| p.eval(*item)))
                .cloned(),
        )
    }

    fn lookup_plan(&self, key: &Value, selectors: &[Selector]) -> OrmResult<(Protocol, RequestNode, RequestDescriptor, bool)> {
        let catalog = self.context.catalog.as_ref();
        let node = RequestNode::build(catalog, &self.resource_type, selectors)?;
        let key_text = key.key_string().ok_or_else(|| {
            OrmError::usage(format!("{} cannot be used as a key of {}", key, self.resource_type))
        })?;

        // direct by-key paths, falling back to a filtered collection request
        let mut targets: Vec<(Protocol, String, bool)> = Vec::new();
        for protocol in Protocol::ALL {
            let Some(collection) = self.collection_path(protocol) else {
                continue;
            };
            let by_key = match &self.source {
                Source::Relation { parent, .. } => self
                    .context
                    .address(parent, protocol)
                    .and_then(|parent_address| {
                        catalog
                            .path_for(&self.resource_type, protocol, PathKind::ByKey)?
                            .render(
                                PathVars::new()
                                    .parent(&parent_address)
                                    .key(&key_text)
                                    .tokens(&self.context.tokens),
                            )
                            .ok()
                    }),
                Source::Root => catalog
                    .path_for(&self.resource_type, protocol, PathKind::ByKey)
                    .and_then(|t| {
                        t.render(PathVars::new().key(&key_text).tokens(&self.context.tokens))
                            .ok()
                    }),
            };
            match by_key {
                Some(path) => targets.push((protocol, path, true)),
                None => targets.push((protocol, collection, false)),
            }
        }
        let addressable: ProtocolSet = targets.iter().map(|(p, _, _)| *p).collect();
        // the protocol must serve the filter and ordering too
        let protocol = protocol::single(catalog, &node, self.context.options.graph_first, addressable)?;
        let (_, path, direct) = targets
            .into_iter()
            .find(|(p, _, _)| *p == protocol)
            .ok_or_else(|| OrmError::usage(format!("{} is not addressable", self.resource_type)))?;

        let mut descriptor = render_projection(catalog, &node, protocol).into_iter().fold(
            RequestDescriptor::get(CorrelationId::new(), protocol, path),
            |d, (name, value)| d.with_param(name, value),
        );
        if !direct {
            let filter = key_filter(catalog, &self.resource_type, node.key_field(), key, protocol)
                .ok_or_else(|| {
                    OrmError::usage(format!(
                        "key of {} cannot be filtered over {}",
                        self.resource_type, protocol
                    ))
                })?;
            descriptor = descriptor.with_param("$filter", filter).with_param("$top", "1");
        }
        Ok((protocol, node, descriptor, direct))
    }

    fn stage_lookup(
        &self,
        protocol: Protocol,
        node: &RequestNode,
        direct: bool,
        result: Result<Document, TransportError>,
    ) -> OrmResult<Option<StagedInstance>> {
        let doc = match result {
            Err(TransportError::Service(err)) if err.is_not_found() => return Ok(None),
            other => other?,
        };
        let mapper = Mapper::new(self.context.catalog.as_ref(), &self.context.overrides, protocol);
        if direct {
            if doc.is_null() {
                return Ok(None);
            }
            mapper.stage_instance(node, &doc).map(Some)
        } else {
            let (mut staged, mut failures) = mapper.stage_collection(node, &doc)?;
            if !failures.is_empty() {
                return Err(failures.remove(0));
            }
            Ok(if staged.is_empty() { None } else { Some(staged.remove(0)) })
        }
    }

    fn commit_lookup(&self, staged: Option<StagedInstance>) -> OrmResult<Option<Resource>> {
        let Some(staged) = staged else {
            return Ok(None);
        };
        let policy = self.context.options.conflict_policy;
        let items = std::slice::from_ref(&staged);
        let instances = match &self.source {
            Source::Relation { parent, relation } => merge_into_collection(parent, relation, items, policy)?,
            Source::Root => materialize(items, policy)?,
        };
        surface_item_failures(&self.resource_type, items)?;
        Ok(instances.into_iter().next())
    }

    /// Member with the given key, or `None` when the service has no such member.
    #[instrument(
        name = "sitegraph.query.get_by_key",
        skip(self, key, selectors),
        fields(resource_type = %self.resource_type),
        err
    )]
    pub async fn get_by_key(&self, key: impl Into<Value>, selectors: &[Selector]) -> OrmResult<Option<Resource>> {
        let key: Value = key.into();
        let (protocol, node, descriptor, direct) = self.lookup_plan(&key, selectors)?;
        let query = self.clone();
        let stage: Stage<Option<StagedInstance>> = Box::new(move |mut results| {
            let staged = query.stage_lookup(protocol, &node, direct, results.remove(0))?;
            let commit: Commit<Option<StagedInstance>> = Box::new(move || Ok(staged));
            Ok(commit)
        });
        let staged = self
            .context
            .batch
            .run(Operation::new(format!("get {}", self.resource_type), vec![descriptor], stage))
            .await?;
        self.commit_lookup(staged)
    }

    /// Queue a key lookup in the open batch.
    pub fn get_by_key_batch(&self, key: impl Into<Value>, selectors: &[Selector]) -> OrmResult<BatchItem<Option<Resource>>> {
        let key: Value = key.into();
        let (protocol, node, descriptor, direct) = self.lookup_plan(&key, selectors)?;
        let query = self.clone();
        let stage: Stage<Option<Resource>> = Box::new(move |mut results| {
            let staged = query.stage_lookup(protocol, &node, direct, results.remove(0))?;
            let commit: Commit<Option<Resource>> = Box::new(move || query.commit_lookup(staged));
            Ok(commit)
        });
        self.context.batch.enqueue(Operation::new(
            format!("get {}", self.resource_type),
            vec![descriptor],
            stage,
        ))
    }

    fn stage_pages(
        &self,
        plan: &Plan,
        pages: &[Document],
    ) -> OrmResult<(Vec<StagedInstance>, Vec<OrmError>, bool)> {
        let mapper = Mapper::new(self.context.catalog.as_ref(), &self.context.overrides, plan.protocol);
        let mut staged = Vec::new();
        let mut failures = Vec::new();
        for page in pages {
            let (items, errors) = mapper.stage_collection(&plan.node, page)?;
            failures.extend(errors);
            failures.extend(items.iter().flat_map(StagedInstance::item_failures));
            staged.extend(items);
        }
        let complete = pages.last().and_then(next_link).is_none();
        Ok((staged, failures, complete))
    }

    fn commit(
        &self,
        plan: &Plan,
        staged: &[StagedInstance],
        failures: Vec<OrmError>,
        complete: bool,
    ) -> OrmResult<Vec<Resource>> {
        let policy = self.context.options.conflict_policy;
        let mut items = match &self.source {
            Source::Relation { parent, relation } => merge_into_collection(parent, relation, staged, policy)?,
            Source::Root => materialize(staged, policy)?,
        };

        let translation = &plan.translation;
        if let Some(predicate) = &translation.local_filter {
            items.retain(|item| predicate.eval(item));
        }
        if translation.local_order {
            items.sort_by(|a, b| compare_by(&self.spec.order, a, b));
        }
        if translation.local_window {
            let skip = self.spec.skip.unwrap_or(0);
            let top = self.spec.top.unwrap_or(usize::MAX);
            items = items.into_iter().skip(skip).take(top).collect();
        }

        *self.cache() = Some(Materialized {
            items: items.clone(),
            complete,
        });

        if failures.is_empty() {
            Ok(items)
        } else {
            Err(OrmError::ItemMapping {
                resource_type: self.resource_type.clone(),
                failures,
            })
        }
    }
}

fn fetch(resource_type: &str, descriptor: RequestDescriptor) -> Operation<Document> {
    let stage: Stage<Document> = Box::new(|mut results| {
        let doc = results.remove(0)?;
        let commit: Commit<Document> = Box::new(move || Ok(doc));
        Ok(commit)
    });
    Operation::new(format!("query {}", resource_type), vec![descriptor], stage)
}

fn compare_by(order: &[OrderBy], a: &Resource, b: &Resource) -> Ordering {
    for o in order {
        let left = a.get(&o.field).unwrap_or(Value::Null);
        let right = b.get(&o.field).unwrap_or(Value::Null);
        let ordering = left.compare(&right).unwrap_or(Ordering::Equal);
        let ordering = match o.direction {
            OrderDirection::Asc => ordering,
            OrderDirection::Desc => ordering.reverse(),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}
