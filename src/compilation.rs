//! Per-compilation orchestration of signing and friend trust.
//!
//! A [`Compilation`] owns everything one compiler invocation knows about its own identity: the
//! option snapshot, the assembly-level attributes, the [`StrongNameProvider`] it loads and signs
//! keys with, and the answers it has given to friend access queries. Nothing is shared between
//! compilations, so concurrent compilations may disagree about keys and friends.
//!
//! # Identity and friend queries
//!
//! The compilation's public key is computed lazily, the first time it is needed. Computing it
//! evaluates attribute arguments, and an [`ArgumentBinder`](crate::signing::attributes::ArgumentBinder)
//! may in turn ask whether this compilation is a friend of some referenced assembly. Such a
//! query cannot compare keys yet. It is answered from the simple name alone
//! ([`FriendGrantResult::Deferred`]), the grant is recorded, and [`Compilation::analyze`]
//! re-validates every recorded grant once the identity is final. Binding proceeds identically
//! either way; only the legality of the access can change.
//!
//! # Emit
//!
//! [`Compilation::emit`] refuses to run while error diagnostics are outstanding, reserves the
//! signature area through the host's [`ImageWriter`], fills it through [`StrongNameSigner`] and
//! honors a [`CancellationFlag`] until the bytes are handed back.
//!
//! # Examples
//!
//! ```rust,no_run
//! use dotsign::prelude::*;
//!
//! let paul = ReferencedAssembly::new(AssemblyIdentityBuilder::new("Paul").build())
//!     .with_internals_visible_to("John");
//!
//! let john = Compilation::new("John")
//!     .with_options(CompilationOptions::new().with_crypto_key_file(Some("/keys/john.snk")));
//!
//! assert!(john.has_internal_access_to(&paul));
//! let image = john.emit(&PeBuilder::new(), &CancellationFlag::new())?;
//! # Ok::<(), dotsign::Error>(())
//! ```

use std::{cell::Cell, path::Path, sync::OnceLock};

use dashmap::DashMap;
use tracing::{debug, warn};

use crate::{
    access::{
        friends::{ConsumerIdentity, FriendDeclaration, FriendGrantResult},
        ignores::{IgnoresAccessChecksDeclaration, IgnoresAccessChecksResolver},
        overrides::{most_derived_accessible_override, AccessContext, OverrideMember},
        ReferencedAssembly,
    },
    metadata::{
        diagnostics::{DiagnosticCode, Diagnostics, Location},
        identity::{AssemblyIdentity, AssemblyIdentityBuilder, AssemblyVersion},
    },
    signing::{
        attributes::{AttributeKind, SourceAttribute},
        decision::{KeyMaterialResolver, KeyResolution, SigningAttributes, SigningDecision},
        keys::KeySource,
        marker::ModuleSigningMarker,
        options::CompilationOptions,
        pipeline::{CancellationFlag, ImageWriter, StrongNameSigner},
        provider::StrongNameProvider,
    },
    Error, Result,
};

const INVALID_COUNTER_SIGNATURE: &str =
    "Invalid countersignature specified in AssemblySignatureKeyAttribute.";

thread_local! {
    // Address of the compilation whose keys are being computed on this thread, 0 if none.
    static COMPUTING_KEYS_FOR: Cell<usize> = const { Cell::new(0) };
}

struct KeyComputationGuard {
    previous: usize,
}

impl KeyComputationGuard {
    fn enter(compilation: &Compilation) -> Self {
        let previous = COMPUTING_KEYS_FOR.with(|slot| slot.replace(compilation.address()));
        KeyComputationGuard { previous }
    }
}

impl Drop for KeyComputationGuard {
    fn drop(&mut self) {
        COMPUTING_KEYS_FOR.with(|slot| slot.set(self.previous));
    }
}

#[derive(Debug)]
struct ComputedKeys {
    attributes: SigningAttributes,
    resolution: KeyResolution,
    identity: AssemblyIdentity,
    diagnostics: Diagnostics,
}

#[derive(Debug)]
struct DeclaredFriend {
    declaration: FriendDeclaration,
    value: String,
    location: Location,
}

#[derive(Debug, Default)]
struct FriendDeclarations {
    declared: Vec<DeclaredFriend>,
    diagnostics: Diagnostics,
}

/// The output of a netmodule compilation.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    name: String,
    image: Vec<u8>,
    marker: Option<ModuleSigningMarker>,
}

impl CompiledModule {
    /// A module image with an optional signing marker.
    pub fn new(name: impl Into<String>, image: Vec<u8>, marker: Option<ModuleSigningMarker>) -> Self {
        CompiledModule {
            name: name.into(),
            image,
            marker,
        }
    }

    /// Module name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The unsigned module image.
    #[must_use]
    pub fn image(&self) -> &[u8] {
        &self.image
    }

    /// The signing marker, if a key source was configured.
    #[must_use]
    pub fn marker(&self) -> Option<&ModuleSigningMarker> {
        self.marker.as_ref()
    }
}

/// One compilation's signing and friend-trust state.
pub struct Compilation {
    name: String,
    version: AssemblyVersion,
    culture: Option<String>,
    options: CompilationOptions,
    provider: StrongNameProvider,
    attributes: Vec<SourceAttribute>,
    module_attributes: Vec<SourceAttribute>,
    keys: OnceLock<ComputedKeys>,
    friends: OnceLock<FriendDeclarations>,
    ignores: OnceLock<Vec<IgnoresAccessChecksDeclaration>>,
    analysis: OnceLock<Diagnostics>,
    optimistic_grants: DashMap<String, ReferencedAssembly>,
    access_diagnostics: Diagnostics,
    emit_diagnostics: Diagnostics,
}

impl std::fmt::Debug for Compilation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Compilation")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("options", &self.options)
            .field("attributes", &self.attributes.len())
            .field("module_attributes", &self.module_attributes.len())
            .field("keys_computed", &self.keys.get().is_some())
            .finish_non_exhaustive()
    }
}

impl Compilation {
    /// A library compilation named `name` with default options and provider.
    pub fn new(name: impl Into<String>) -> Self {
        Compilation {
            name: name.into(),
            version: AssemblyVersion::default(),
            culture: None,
            options: CompilationOptions::new(),
            provider: StrongNameProvider::new(),
            attributes: Vec::new(),
            module_attributes: Vec::new(),
            keys: OnceLock::new(),
            friends: OnceLock::new(),
            ignores: OnceLock::new(),
            analysis: OnceLock::new(),
            optimistic_grants: DashMap::new(),
            access_diagnostics: Diagnostics::new(),
            emit_diagnostics: Diagnostics::new(),
        }
    }

    /// Set the assembly version.
    #[must_use]
    pub fn with_version(mut self, version: AssemblyVersion) -> Self {
        self.version = version;
        self
    }

    /// Set the assembly culture.
    #[must_use]
    pub fn with_culture(mut self, culture: impl Into<String>) -> Self {
        self.culture = Some(culture.into());
        self
    }

    /// Set the option snapshot.
    #[must_use]
    pub fn with_options(mut self, options: CompilationOptions) -> Self {
        self.options = options;
        self
    }

    /// Set the provider keys are loaded and signed with.
    #[must_use]
    pub fn with_provider(mut self, provider: StrongNameProvider) -> Self {
        self.provider = provider;
        self
    }

    /// Add an assembly-level attribute declared in source.
    #[must_use]
    pub fn with_attribute(mut self, attribute: SourceAttribute) -> Self {
        self.attributes.push(attribute);
        self
    }

    /// Add several assembly-level attributes declared in source.
    #[must_use]
    pub fn with_attributes(mut self, attributes: impl IntoIterator<Item = SourceAttribute>) -> Self {
        self.attributes.extend(attributes);
        self
    }

    /// Add a compiled netmodule.
    ///
    /// The module's signing marker contributes attributes as if declared in source, ordered
    /// after the attributes of this compilation.
    ///
    /// # Errors
    /// Returns an error if the marker cannot be decoded.
    pub fn with_module(mut self, module: CompiledModule) -> Result<Self> {
        if let Some(marker) = &module.marker {
            let attributes = marker.to_attributes(&module.name)?;
            debug!(
                module = %module.name,
                count = attributes.len(),
                "added module carries signing attributes"
            );
            self.module_attributes.extend(attributes);
        }
        Ok(self)
    }

    /// Simple name of the assembly.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The option snapshot.
    #[must_use]
    pub fn options(&self) -> &CompilationOptions {
        &self.options
    }

    /// The provider keys are loaded and signed with.
    #[must_use]
    pub fn provider(&self) -> &StrongNameProvider {
        &self.provider
    }

    fn address(&self) -> usize {
        self as *const Compilation as usize
    }

    fn is_computing_keys(&self) -> bool {
        COMPUTING_KEYS_FOR.with(|slot| slot.get() == self.address())
    }

    fn all_attributes(&self) -> impl Iterator<Item = (usize, &SourceAttribute)> {
        self.attributes
            .iter()
            .chain(self.module_attributes.iter())
            .enumerate()
    }

    fn keys(&self) -> &ComputedKeys {
        self.keys.get_or_init(|| {
            let _guard = KeyComputationGuard::enter(self);
            self.compute_keys()
        })
    }

    fn compute_keys(&self) -> ComputedKeys {
        let diagnostics = Diagnostics::new();
        let attributes: Vec<SourceAttribute> =
            self.all_attributes().map(|(_, a)| a.clone()).collect();

        let attributes = SigningAttributes::collect(
            &attributes,
            &self.options,
            |argument| argument.resolve(self),
            &diagnostics,
        );
        let resolution =
            KeyMaterialResolver::new(&self.options, &self.provider).resolve(&attributes, &diagnostics);

        let identity = AssemblyIdentityBuilder::new(self.name.clone())
            .version(self.version)
            .culture(self.culture.clone())
            .public_key(&resolution.public_key)
            .build();

        if resolution.load_failed {
            warn!(assembly = %self.name, "signing degraded to unsigned");
        }
        debug!(identity = %identity.display_name(), "assembly identity is final");

        ComputedKeys {
            attributes,
            resolution,
            identity,
            diagnostics,
        }
    }

    /// The final assembly identity.
    ///
    /// Forces key resolution. Must not be called from an attribute argument binder of this
    /// compilation.
    #[must_use]
    pub fn identity(&self) -> &AssemblyIdentity {
        &self.keys().identity
    }

    /// The signing decision.
    #[must_use]
    pub fn signing_decision(&self) -> &SigningDecision {
        &self.keys().resolution.decision
    }

    /// Effective delay-sign setting.
    #[must_use]
    pub fn is_delay_signed(&self) -> bool {
        self.keys().resolution.is_delay_signed
    }

    fn friend_declarations(&self) -> &FriendDeclarations {
        self.friends.get_or_init(|| {
            let mut friends = FriendDeclarations::default();
            for (index, attribute) in self.all_attributes() {
                let AttributeKind::InternalsVisibleTo(argument) = &attribute.kind else {
                    continue;
                };
                let value = argument.resolve(self);
                let location = Location::attribute(attribute.full_name(), index);
                if let Some(declaration) =
                    FriendDeclaration::decode(value.as_deref(), location.clone(), &friends.diagnostics)
                {
                    friends.declared.push(DeclaredFriend {
                        declaration,
                        value: value.unwrap_or_default(),
                        location,
                    });
                }
            }
            friends
        })
    }

    fn ignores_declarations(&self) -> &[IgnoresAccessChecksDeclaration] {
        self.ignores.get_or_init(|| {
            self.all_attributes()
                .filter_map(|(_, attribute)| match &attribute.kind {
                    AttributeKind::IgnoresAccessChecksTo(argument) => {
                        IgnoresAccessChecksDeclaration::parse(argument.resolve(self).as_deref())
                    }
                    _ => None,
                })
                .collect()
        })
    }

    /// Run declaration analysis and return its diagnostics.
    ///
    /// Validates the options, resolves keys, decodes `InternalsVisibleTo` declarations and
    /// re-validates every friend grant that was answered optimistically while keys were being
    /// computed. Runs once; later calls return the same bag.
    pub fn analyze(&self) -> &Diagnostics {
        self.analysis.get_or_init(|| {
            let diagnostics = Diagnostics::new();
            self.options.validate(&diagnostics);

            let keys = self.keys();
            diagnostics.extend_from(&keys.diagnostics);

            let friends = self.friend_declarations();
            diagnostics.extend_from(&friends.diagnostics);
            if keys.identity.is_strong_named() {
                for friend in &friends.declared {
                    if friend.declaration.public_key.is_none() {
                        diagnostics.report(
                            DiagnosticCode::FriendAssemblySNReq,
                            friend.location.clone(),
                            [friend.value.clone()],
                        );
                    }
                }
            }

            let mut producers: Vec<String> = self
                .optimistic_grants
                .iter()
                .map(|entry| entry.key().clone())
                .collect();
            producers.sort();
            for producer in producers {
                let Some(reference) = self.optimistic_grants.get(&producer) else {
                    continue;
                };
                let result = reference
                    .friend_resolver()
                    .revalidate(&keys.identity, &diagnostics);
                debug!(producer = %producer, result = ?result, "re-validated deferred friend grant");
            }

            diagnostics
        })
    }

    /// Every diagnostic reported so far: analysis, access checks and emit.
    #[must_use]
    pub fn diagnostics(&self) -> Diagnostics {
        let all = Diagnostics::new();
        all.extend_from(self.analyze());
        all.extend_from(&self.access_diagnostics);
        all.extend_from(&self.emit_diagnostics);
        all
    }

    /// Does `producer` name this compilation as a friend?
    ///
    /// While this compilation's keys are being computed the answer is
    /// [`FriendGrantResult::Deferred`] on a simple name match, and the grant is re-validated by
    /// [`Compilation::analyze`]. Returns `None` if no declaration names this compilation.
    pub fn friend_grant(&self, producer: &ReferencedAssembly) -> Option<FriendGrantResult> {
        let resolver = producer.friend_resolver();

        if self.is_computing_keys() {
            let result = resolver.grants_access_to(ConsumerIdentity::Pending { name: &self.name });
            if result == Some(FriendGrantResult::Deferred) {
                self.optimistic_grants
                    .entry(producer.identity().display_name())
                    .or_insert_with(|| producer.clone());
            }
            return result;
        }

        resolver.grants_access_to(ConsumerIdentity::Final(self.identity()))
    }

    /// May this compilation use the internals of `producer`?
    ///
    /// True if `producer` grants friend access (deferred grants count) or this compilation
    /// declares `IgnoresAccessChecksTo` naming it.
    pub fn has_internal_access_to(&self, producer: &ReferencedAssembly) -> bool {
        self.friend_grant(producer)
            .is_some_and(FriendGrantResult::is_granted)
            || IgnoresAccessChecksResolver::new(self.ignores_declarations())
                .grants_access_to(producer.identity())
    }

    /// Check access to the internal member `member` of `producer`, reporting a denial.
    ///
    /// A friend declaration that names this compilation but rejects its key reports
    /// `FriendRefNotEqualToThis` before the `BadAccess` error.
    pub fn check_member_access(&self, producer: &ReferencedAssembly, member: &str) -> bool {
        if self.has_internal_access_to(producer) {
            return true;
        }

        if let Some(FriendGrantResult::DeniedMismatch | FriendGrantResult::DeniedMissingKey) =
            self.friend_grant(producer)
        {
            self.access_diagnostics.report(
                DiagnosticCode::FriendRefNotEqualToThis,
                Location::Compilation,
                [producer.identity().display_name(), self.identity().display_name()],
            );
        }
        self.access_diagnostics
            .report(DiagnosticCode::BadAccess, Location::Compilation, [member]);
        false
    }

    /// The override a virtual call from this compilation binds to.
    ///
    /// `chain` runs from most to least derived; `references` supplies the friend declarations of
    /// the assemblies declaring its members.
    pub fn resolve_override<'a>(
        &self,
        chain: &'a [OverrideMember],
        in_derived_type: bool,
        references: &[ReferencedAssembly],
    ) -> Option<&'a OverrideMember> {
        let context = AccessContext {
            assembly: &self.name,
            in_derived_type,
        };
        most_derived_accessible_override(chain, context, |assembly| {
            references
                .iter()
                .find(|reference| reference.name() == assembly)
                .is_some_and(|reference| self.has_internal_access_to(reference))
        })
    }

    /// This compilation as seen by compilations that reference it.
    #[must_use]
    pub fn to_reference(&self) -> ReferencedAssembly {
        self.friend_declarations().declared.iter().fold(
            ReferencedAssembly::new(self.identity().clone()),
            |reference, friend| reference.with_friend(friend.declaration.clone()),
        )
    }

    fn report_key_failure(&self, resolution: &KeyResolution, reason: &str) {
        let (code, name) = match resolution.key_source.as_ref().map(|s| &s.source) {
            Some(KeySource::KeyContainerName(name)) => {
                (DiagnosticCode::PublicKeyContainerFailure, name.as_str())
            }
            _ => (DiagnosticCode::PublicKeyFileFailure, resolution.key_file_path()),
        };
        self.emit_diagnostics
            .report(code, Location::Compilation, [name, reason]);
    }

    /// Produce the signed image.
    ///
    /// # Errors
    /// - [`crate::Error::EmitFailed`] if error diagnostics are outstanding
    /// - [`crate::Error::SignButNoPrivateKey`] if real signing lacks a private key
    /// - [`crate::Error::InvalidSignaturePublicKey`] for an unusable counter signature
    /// - [`crate::Error::Cancelled`] if `cancel` fires before the image is returned
    /// - Writer and backend errors
    pub fn emit(&self, writer: &dyn ImageWriter, cancel: &CancellationFlag) -> Result<Vec<u8>> {
        let diagnostics = self.diagnostics();
        if diagnostics.has_errors() {
            return Err(Error::EmitFailed(diagnostics.summary()));
        }

        let keys = self.keys();
        let resolution = &keys.resolution;
        let decision = &resolution.decision;
        cancel.check()?;

        match decision {
            SigningDecision::FullSign(material) | SigningDecision::CounterSign { primary: material, .. }
                if !material.has_private_key() =>
            {
                let path = resolution.key_file_path().to_string();
                self.emit_diagnostics.report(
                    DiagnosticCode::SignButNoPrivateKey,
                    Location::Compilation,
                    [path.clone()],
                );
                return Err(Error::SignButNoPrivateKey(path));
            }
            SigningDecision::CounterSign { primary, counter } => {
                if counter.decode_signature(primary.modulus_len()).is_err() {
                    self.report_key_failure(resolution, INVALID_COUNTER_SIGNATURE);
                    return Err(Error::InvalidSignaturePublicKey);
                }
            }
            _ => {}
        }

        let image = writer.write_image(decision.reserved_signature_size())?;
        let signed = StrongNameSigner::new(&self.provider)
            .apply(image, decision, cancel)
            .inspect_err(|error| {
                if let Error::Crypto(reason) = error {
                    self.report_key_failure(resolution, reason);
                }
            })?;

        cancel.check()?;
        Ok(signed)
    }

    /// Emit and write the image to `path`. Nothing is written unless emit succeeds.
    ///
    /// # Errors
    /// See [`Compilation::emit`]; I/O errors from writing `path`.
    pub fn emit_to_path(
        &self,
        writer: &dyn ImageWriter,
        cancel: &CancellationFlag,
        path: impl AsRef<Path>,
    ) -> Result<()> {
        let image = self.emit(writer, cancel)?;
        std::fs::write(path, image)?;
        Ok(())
    }

    /// Emit a netmodule with its signing marker.
    ///
    /// # Errors
    /// Returns [`crate::Error::NotSupported`] unless the output kind is a netmodule; otherwise see
    /// [`Compilation::emit`].
    pub fn emit_module(
        &self,
        writer: &dyn ImageWriter,
        cancel: &CancellationFlag,
    ) -> Result<CompiledModule> {
        if !self.options.output_kind().is_net_module() {
            return Err(Error::NotSupported);
        }

        let image = self.emit(writer, cancel)?;
        let marker = ModuleSigningMarker::synthesize(&self.options, &self.keys().attributes);
        Ok(CompiledModule::new(self.name.clone(), image, marker))
    }
}
