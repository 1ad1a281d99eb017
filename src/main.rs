use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use hdbuild::build::{ContainerRef, Field};
use hdbuild::store::Document;
use hdbuild::{
    BuildManager, FileStore, Namespace, NamespaceCatalog, Overlay, Sidecar, TypeMap,
};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

pub type Result<T> = anyhow::Result<T>;

#[derive(Parser)]
#[command(name = "hdbuild")]
#[command(about = "Schema-driven container store with sidecar patches", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse a sidecar file and check its structure.
    Validate {
        #[arg(long)]
        sidecar: PathBuf,
    },

    /// Apply a sidecar to a stored container and write the patched document.
    Patch {
        #[arg(long)]
        container: PathBuf,

        /// Defaults to the sidecar next to the container.
        #[arg(long)]
        sidecar: Option<PathBuf>,

        /// Defaults to stdout.
        #[arg(short = 'o', long)]
        out: Option<PathBuf>,
    },

    /// Print the node paths of a stored container (sidecar applied).
    Show {
        #[arg(long)]
        container: PathBuf,
    },

    /// Construct the typed objects of a stored container and print them.
    Read {
        #[arg(long)]
        container: PathBuf,

        /// Namespace JSON file with the resolved specs.
        #[arg(long)]
        namespace: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.cmd {
        Commands::Validate { sidecar } => {
            let parsed = Sidecar::from_path(&sidecar)
                .with_context(|| format!("validating {}", sidecar.display()))?;
            let changes: usize = parsed.versions.iter().map(|v| v.changes.len()).sum();
            println!(
                "{}: schema {}, {} version(s), {} change(s)",
                sidecar.display(),
                parsed.schema_version,
                parsed.versions.len(),
                changes
            );
        }
        Commands::Patch {
            container,
            sidecar,
            out,
        } => {
            let overlay = load(&container, sidecar.as_deref())?;
            let (tree, versions) = match overlay {
                Overlay::Patched { tree, versions } => (tree, versions),
                Overlay::Failed { error, .. } => bail!("{}: {error}", container.display()),
                Overlay::Loaded(_) => bail!("{}: no sidecar to apply", container.display()),
            };
            log::info!("applied versions: {}", versions.join(", "));

            let text = serde_json::to_string_pretty(&Document::from_tree(&tree)?)?;
            match out {
                Some(out) => {
                    std::fs::write(&out, text)
                        .with_context(|| format!("writing {}", out.display()))?;
                    println!("Wrote {}", out.display());
                }
                None => println!("{text}"),
            }
        }
        Commands::Show { container } => {
            let overlay = load(&container, None)?;
            if let Some(error) = overlay.error() {
                eprintln!("warning: sidecar not applied: {error}");
            }
            for line in overlay.tree().describe() {
                println!("{line}");
            }
        }
        Commands::Read {
            container,
            namespace,
        } => {
            let text = std::fs::read_to_string(&namespace)
                .with_context(|| format!("reading {}", namespace.display()))?;
            let ns = Namespace::from_json_str(&text)?;
            let mut catalog = NamespaceCatalog::new();
            catalog.add_namespace(&ns.name.clone(), ns)?;
            let type_map = TypeMap::new(catalog);

            let overlay = load(&container, None)?;
            let mut manager = BuildManager::new(&type_map);
            let root = overlay.construct(&mut manager)?;
            let mut seen = HashSet::new();
            print_container(&root, 0, &mut seen);
        }
    }

    Ok(())
}

fn load(container: &Path, sidecar: Option<&Path>) -> Result<Overlay> {
    let store = FileStore::new(container);
    let overlay = match sidecar {
        Some(path) => store.read_with_sidecar(path),
        None => store.read_patched(),
    };
    overlay.with_context(|| format!("reading {}", container.display()))
}

fn print_container(c: &ContainerRef, depth: usize, seen: &mut HashSet<hdbuild::ObjectId>) {
    let c = c.borrow();
    let pad = "  ".repeat(depth);
    println!("{pad}{} ({}) {}", c.name(), c.class().name(), c.object_id());
    if !seen.insert(c.object_id()) {
        return;
    }
    for (name, field) in c.fields() {
        match field {
            Field::Value(v) => println!("{pad}  {name} = {v}"),
            Field::Child(child) => {
                println!("{pad}  {name}:");
                print_container(child, depth + 2, seen);
            }
            Field::Children(children) => {
                println!("{pad}  {name}: [{}]", children.len());
                for child in children {
                    print_container(child, depth + 2, seen);
                }
            }
            Field::Reference(target) => println!("{pad}  {name} -> {}", target.borrow().object_id()),
            Field::References(targets) => {
                let ids: Vec<String> = targets
                    .iter()
                    .map(|t| t.borrow().object_id().to_string())
                    .collect();
                println!("{pad}  {name} -> [{}]", ids.join(", "));
            }
        }
    }
}
