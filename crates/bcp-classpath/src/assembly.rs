//! Classpath of one project, assembled from aspect output.

use std::collections::{BTreeMap, HashSet};

use bcp_bazel::{AspectIndex, JarSet, TargetInfo};

use crate::{
    entry::{ClasspathEntry, ClasspathResult, JarResolver, LibraryEntry, ProjectEntry},
    implicit::ImplicitDependencies,
    projects::{requested_infos, ProjectDefinition, ProjectIndex},
};

/// Insertion-ordered entries keyed by jar path or project name.
#[derive(Debug, Default)]
struct EntryMap {
    order: Vec<String>,
    entries: BTreeMap<String, ClasspathEntry>,
}

impl EntryMap {
    fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    fn insert(&mut self, key: String, entry: ClasspathEntry) {
        if self.entries.insert(key.clone(), entry).is_none() {
            self.order.push(key);
        }
    }

    fn remove(&mut self, key: &str) {
        if self.entries.remove(key).is_some() {
            self.order.retain(|existing| existing != key);
        }
    }

    fn into_values(mut self) -> impl Iterator<Item = ClasspathEntry> {
        self.order
            .into_iter()
            .filter_map(move |key| self.entries.remove(&key))
    }
}

#[derive(Debug, Default)]
struct Collected {
    main: EntryMap,
    test: EntryMap,
    implicit: Vec<LibraryEntry>,
    project_references: Vec<String>,
}

impl Collected {
    /// Main entries win: they evict a test entry with the same key, and a
    /// test entry is dropped when the main map already has it.
    fn add(&mut self, entry: ClasspathEntry, for_test: bool) {
        let key = entry.key();
        if for_test {
            if !self.main.contains(&key) {
                self.test.insert(key, entry.with_test_only(true));
            }
        } else {
            self.test.remove(&key);
            self.main.insert(key, entry);
        }
    }

    fn add_project_reference(&mut self, name: &str) {
        if !self.project_references.iter().any(|existing| existing == name) {
            self.project_references.push(name.to_string());
        }
    }
}

/// Builds project classpaths from aspect infos.
#[derive(Debug)]
pub struct ClasspathAssembler<'a> {
    projects: &'a ProjectIndex,
    resolver: JarResolver,
}

impl<'a> ClasspathAssembler<'a> {
    pub fn new(projects: &'a ProjectIndex, resolver: JarResolver) -> Self {
        Self { projects, resolver }
    }

    /// Classpath of `project`: main entries, then test entries, then the
    /// implicit test dependencies.
    pub fn assemble(
        mut self,
        project: &ProjectDefinition,
        infos: &AspectIndex,
        implicit: &dyn ImplicitDependencies,
    ) -> ClasspathResult {
        let mut collected = Collected::default();
        let mut complete = true;

        for target in &project.targets {
            let requested = requested_infos(infos, target);
            if requested.is_empty() {
                tracing::warn!(
                    target = "bcp.classpath",
                    project = %project.name,
                    label = %target,
                    "no aspect info for target; classpath is incomplete"
                );
                complete = false;
                continue;
            }
            for info in requested {
                let for_test = info.is_test();
                for dep in infos.transitive_closure(info) {
                    self.add_dependency(project, dep, for_test, implicit, &mut collected);
                }
            }
        }

        let mut seen_implicit = HashSet::new();
        let implicit_entries = std::mem::take(&mut collected.implicit)
            .into_iter()
            .filter(|entry| seen_implicit.insert(entry.jar.clone()))
            .map(ClasspathEntry::Library);

        let Collected {
            main,
            test,
            project_references,
            ..
        } = collected;
        ClasspathResult {
            entries: main
                .into_values()
                .chain(test.into_values())
                .chain(implicit_entries)
                .collect(),
            project_references,
            complete,
            missing: self.resolver.missing(),
        }
    }

    fn add_dependency(
        &mut self,
        project: &ProjectDefinition,
        dep: &TargetInfo,
        for_test: bool,
        implicit: &dyn ImplicitDependencies,
        collected: &mut Collected,
    ) {
        if project.has_target(&dep.label) {
            if dep.is_kind("java_library") || dep.is_kind("java_binary") {
                return;
            }
            if dep.is_test() {
                collected
                    .implicit
                    .extend(implicit.implicit_test_dependencies(dep));
                return;
            }
            if !dep.is_kind("java_import") {
                tracing::info!(
                    target = "bcp.classpath",
                    label = %dep.label,
                    kind = %dep.kind,
                    "unexpected kind among project targets; adding its jars"
                );
            }
        }

        let projects = self.projects;
        match projects.owner_of(dep) {
            None => {
                self.add_jars(dep, &dep.generated_jars, for_test, collected);
                self.add_jars(dep, &dep.jars, for_test, collected);
            }
            Some(owner) if owner.name != project.name => {
                collected.add(
                    ClasspathEntry::Project(ProjectEntry {
                        name: owner.name.clone(),
                        test_only: for_test,
                    }),
                    for_test,
                );
                collected.add_project_reference(&owner.name);
            }
            Some(_) => {
                if !(dep.is_kind("java_library")
                    || dep.is_kind("java_binary")
                    || dep.is_kind("java_test"))
                {
                    self.add_jars(dep, &dep.generated_jars, for_test, collected);
                    self.add_jars(dep, &dep.jars, for_test, collected);
                }
            }
        }
    }

    fn add_jars(
        &mut self,
        dep: &TargetInfo,
        jars: &[JarSet],
        for_test: bool,
        collected: &mut Collected,
    ) {
        for jar_set in jars {
            if let Some(entry) = self.resolver.resolve(jar_set, for_test, Some(&dep.label)) {
                collected.add(ClasspathEntry::Library(entry), for_test);
            }
        }
    }
}
