// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! Script objects the bridge resolves once at init.

use log::debug;

use crate::errors::Error;
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fetch {
    /// Import by dotted name.
    Module,
    /// Attribute of the parent that must be a class.
    Type,
    /// Attribute of the parent that must be callable.
    Callable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Traceback,
    FormatException,
    Script,
    RequestType,
    ResultType,
    Init,
    AfterFork,
    ItemList,
    GetValue,
    Uninit,
}

#[derive(Debug, Clone)]
pub struct SymbolSpec {
    pub slot: Slot,
    pub parent: Option<Slot>,
    pub name: String,
    pub fetch: Fetch,
}

impl SymbolSpec {
    fn new(slot: Slot, parent: Option<Slot>, name: &str, fetch: Fetch) -> Self {
        Self {
            slot,
            parent,
            name: name.to_string(),
            fetch,
        }
    }
}

/// Binding order. Every parent precedes its children.
pub fn symbol_table(script_module: &str) -> Vec<SymbolSpec> {
    use Fetch::*;
    use Slot::*;
    vec![
        SymbolSpec::new(Traceback, None, "traceback", Module),
        SymbolSpec::new(FormatException, Some(Traceback), "format_exception", Callable),
        SymbolSpec::new(Script, None, script_module, Module),
        SymbolSpec::new(RequestType, Some(Script), "AgentRequest", Type),
        SymbolSpec::new(ResultType, Some(Script), "AgentResult", Type),
        SymbolSpec::new(Init, Some(Script), "init", Callable),
        SymbolSpec::new(AfterFork, Some(Script), "after_fork", Callable),
        SymbolSpec::new(ItemList, Some(Script), "item_list", Callable),
        SymbolSpec::new(GetValue, Some(Script), "get_value", Callable),
        SymbolSpec::new(Uninit, Some(Script), "uninit", Callable),
    ]
}

/// Resolved objects, kept in binding order.
pub struct Symbols<O> {
    bound: Vec<(Slot, String, O)>,
}

impl<O> Default for Symbols<O> {
    fn default() -> Self {
        Self { bound: Vec::new() }
    }
}

impl<O> Symbols<O> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `table` in order, stopping at the first failure.
    ///
    /// Entries bound before the failure stay in place for [`Symbols::release`].
    /// A failed lookup leaves its fault pending in the runtime.
    pub fn bind<R>(&mut self, rt: &R, table: &[SymbolSpec]) -> Result<(), Error>
    where
        R: Runtime<Object = O>,
    {
        for entry in table {
            let (qualified, obj) = match entry.parent {
                None => (entry.name.clone(), rt.import(&entry.name)),
                Some(parent) => {
                    let Some((parent_name, parent_obj)) = self.find(parent) else {
                        return Err(Error::Binding {
                            name: entry.name.clone(),
                            reason: format!("parent {parent:?} is not bound"),
                        });
                    };
                    let qualified = format!("{parent_name}.{}", entry.name);
                    (qualified, rt.getattr(parent_obj, &entry.name))
                }
            };

            let obj = obj.map_err(|_| Error::Binding {
                name: qualified.clone(),
                reason: "lookup raised".to_string(),
            })?;

            let wrong_kind = match entry.fetch {
                Fetch::Module => None,
                Fetch::Type => (!rt.is_type(&obj)).then_some("not a type"),
                Fetch::Callable => (!rt.is_callable(&obj)).then_some("not callable"),
            };
            if let Some(reason) = wrong_kind {
                rt.release(obj);
                return Err(Error::Binding {
                    name: qualified,
                    reason: reason.to_string(),
                });
            }

            debug!("Bound {qualified}");
            self.bound.push((entry.slot, qualified, obj));
        }
        Ok(())
    }

    fn find(&self, slot: Slot) -> Option<(&str, &O)> {
        self.bound
            .iter()
            .find(|(s, _, _)| *s == slot)
            .map(|(_, name, obj)| (name.as_str(), obj))
    }

    pub fn get_opt(&self, slot: Slot) -> Option<&O> {
        self.find(slot).map(|(_, obj)| obj)
    }

    pub fn get(&self, slot: Slot) -> Result<&O, Error> {
        self.get_opt(slot).ok_or_else(|| Error::Binding {
            name: format!("{slot:?}"),
            reason: "not bound".to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.bound.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bound.is_empty()
    }

    /// Release every bound object, children first. Releasing an empty table
    /// is a no-op.
    pub fn release<R>(&mut self, rt: &R)
    where
        R: Runtime<Object = O>,
    {
        while let Some((_, _, obj)) = self.bound.pop() {
            rt.release(obj);
        }
    }
}
