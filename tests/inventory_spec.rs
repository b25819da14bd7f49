use std::fs;
use std::path::Path;

use archmaster::error::Error;
use archmaster::inventory::{Inventory, LocalDirDb};
use archmaster::models::*;
use speculate2::speculate;

struct Entry<'a> {
    name: &'a str,
    version: &'a str,
    reason_dependency: bool,
    size: i64,
    depends: &'a [&'a str],
    optdepends: &'a [&'a str],
    provides: &'a [&'a str],
    files: &'a [&'a str],
}

impl Default for Entry<'_> {
    fn default() -> Self {
        Self {
            name: "",
            version: "1.0-1",
            reason_dependency: false,
            size: 1024,
            depends: &[],
            optdepends: &[],
            provides: &[],
            files: &[],
        }
    }
}

fn section(out: &mut String, key: &str, values: &[&str]) {
    if values.is_empty() {
        return;
    }
    out.push_str(&format!("%{}%\n", key));
    for value in values {
        out.push_str(value);
        out.push('\n');
    }
    out.push('\n');
}

fn write_entry(db_path: &Path, entry: &Entry) {
    let dir = db_path
        .join("local")
        .join(format!("{}-{}", entry.name, entry.version));
    fs::create_dir_all(&dir).expect("Failed to create entry dir");

    let mut desc = String::new();
    section(&mut desc, "NAME", &[entry.name]);
    section(&mut desc, "VERSION", &[entry.version]);
    section(&mut desc, "DESC", &[&format!("The {} package", entry.name)]);
    section(&mut desc, "SIZE", &[&entry.size.to_string()]);
    if entry.reason_dependency {
        section(&mut desc, "REASON", &["1"]);
    }
    section(&mut desc, "DEPENDS", entry.depends);
    section(&mut desc, "OPTDEPENDS", entry.optdepends);
    section(&mut desc, "PROVIDES", entry.provides);
    fs::write(dir.join("desc"), desc).expect("Failed to write desc");

    let mut files = String::new();
    section(&mut files, "FILES", entry.files);
    fs::write(dir.join("files"), files).expect("Failed to write files");
}

/// vim needs glibc and sh (provided by bash); python is only an optional
/// dependency of vim; leftover is a dependency nothing needs.
fn fixture(db_path: &Path) {
    fs::create_dir_all(db_path.join("local")).expect("Failed to create local dir");
    fs::write(db_path.join("local").join("ALPM_DB_VERSION"), "9\n").expect("Failed to write");

    write_entry(db_path, &Entry {
        name: "vim",
        version: "9.1.0-1",
        size: 4096,
        depends: &["glibc>=2.38", "sh"],
        optdepends: &["python: scripting support"],
        files: &["usr/", "usr/bin/", "usr/bin/vim", "usr/share/vim/"],
        ..Entry::default()
    });
    write_entry(db_path, &Entry {
        name: "bash",
        version: "5.2.026-2",
        reason_dependency: true,
        size: 8192,
        depends: &["glibc"],
        provides: &["sh"],
        files: &["usr/", "usr/bin/", "usr/bin/bash", "usr/bin/sh"],
        ..Entry::default()
    });
    write_entry(db_path, &Entry {
        name: "glibc",
        version: "2.39-1",
        reason_dependency: true,
        size: 16384,
        files: &["usr/", "usr/lib/", "usr/lib/libc.so.6"],
        ..Entry::default()
    });
    write_entry(db_path, &Entry {
        name: "python",
        version: "3.12.3-1",
        reason_dependency: true,
        size: 2048,
        depends: &["glibc"],
        ..Entry::default()
    });
    write_entry(db_path, &Entry {
        name: "leftover",
        version: "0.1-1",
        reason_dependency: true,
        size: 512,
        ..Entry::default()
    });
}

fn names(packages: Vec<Package>) -> Vec<String> {
    packages.into_iter().map(|p| p.name).collect()
}

speculate! {
    before {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        fixture(dir.path());
        let mut inventory = Inventory::new(LocalDirDb::open(dir.path()).expect("Failed to open db"));
    }

    describe "package lists" {
        it "lists every package sorted by name" {
            assert_eq!(
                names(inventory.all_packages()),
                vec!["bash", "glibc", "leftover", "python", "vim"]
            );
        }

        it "splits explicit and dependency packages" {
            assert_eq!(names(inventory.explicit_packages()), vec!["vim"]);
            assert_eq!(inventory.dependency_count(), 4);
            assert_eq!(inventory.explicit_count() + inventory.dependency_count(), inventory.total_count());
        }

        it "finds orphans but not optional dependencies" {
            assert_eq!(names(inventory.orphan_packages()), vec!["leftover"]);
            assert_eq!(inventory.orphan_count(), 1);
        }

        it "searches names and descriptions case-insensitively" {
            assert_eq!(names(inventory.search("VIM")), vec!["vim"]);
            assert_eq!(names(inventory.search("the glibc")), vec!["glibc"]);
            assert!(inventory.search("").is_empty());
        }
    }

    describe "relations" {
        it "links reverse dependencies through provides" {
            assert_eq!(inventory.reverse_dependencies("bash").expect("Query failed"), vec!["vim"]);
            assert_eq!(
                inventory.reverse_dependencies("glibc").expect("Query failed"),
                vec!["bash", "python", "vim"]
            );
            assert_eq!(
                inventory.package("python").expect("Package missing").optional_for,
                vec!["vim"]
            );
        }

        it "strips version constraints from dependencies" {
            assert_eq!(inventory.dependencies("vim").expect("Query failed"), vec!["glibc", "sh"]);
        }

        it "walks the dependency tree to the requested depth" {
            let shallow = inventory.dependency_tree("vim", 1).expect("Query failed");
            assert_eq!(shallow.len(), 1);

            let deep = inventory.dependency_tree("vim", 3).expect("Query failed");
            assert_eq!(deep["vim"], vec!["glibc", "sh"]);
            assert_eq!(deep["sh"], vec!["glibc"]);
            assert!(deep["glibc"].is_empty());
        }

        it "walks the reverse tree" {
            let tree = inventory.reverse_dependency_tree("glibc", 2).expect("Query failed");
            assert_eq!(tree["glibc"], vec!["bash", "python", "vim"]);
            assert!(tree.contains_key("bash"));
        }

        it "reports unknown packages" {
            assert!(matches!(
                inventory.dependencies("nope"),
                Err(Error::PackageNotFound(name)) if name == "nope"
            ));
            assert!(!inventory.exists("nope"));
        }
    }

    describe "files" {
        it "lists a package's files as absolute paths" {
            let files = inventory.files_of("vim").expect("Query failed");
            assert!(files.contains(&"/usr/bin/vim".to_string()));
            assert!(files.iter().all(|f| f.starts_with('/')));
        }

        it "finds the owner of a file" {
            assert_eq!(inventory.owner_of("/usr/bin/sh").expect("Query failed").as_deref(), Some("bash"));
            assert_eq!(inventory.owner_of("/usr/share/vim").expect("Query failed").as_deref(), Some("vim"));
            assert!(inventory.owner_of("/etc/nothing").expect("Query failed").is_none());
        }
    }

    describe "sizes" {
        it "sums installed sizes and sorts largest first" {
            assert_eq!(inventory.total_installed_size(), 4096 + 8192 + 16384 + 2048 + 512);
            let sizes = inventory.size_by_package();
            assert_eq!(sizes[0], ("glibc".to_string(), 16384));
            assert_eq!(sizes.last().expect("No sizes").0, "leftover");
        }
    }

    describe "refresh" {
        it "sees packages installed after opening" {
            write_entry(dir.path(), &Entry { name: "git", ..Entry::default() });
            assert!(!inventory.exists("git"));

            inventory.refresh().expect("Refresh failed");
            assert!(inventory.exists("git"));
            assert!(inventory.last_error().is_none());
        }

        it "keeps the error when the database disappears" {
            fs::remove_dir_all(dir.path().join("local")).expect("Failed to remove");
            assert!(inventory.refresh().is_err());
            assert!(inventory.last_error().is_some());
        }
    }

    describe "privileged operations" {
        it "hands back the command to run instead of changing anything" {
            match inventory.remove_package("leftover", true) {
                Err(Error::RequiresPrivilege { command }) => {
                    assert_eq!(command, "pacman -Rns --noconfirm 'leftover'");
                }
                other => panic!("expected RequiresPrivilege, got {:?}", other),
            }
            assert!(matches!(inventory.update_system(), Err(Error::RequiresPrivilege { .. })));
            assert!(matches!(inventory.clean_cache(), Err(Error::RequiresPrivilege { .. })));
        }
    }

    describe "opening" {
        it "fails when there is no local database" {
            let empty = tempfile::tempdir().expect("Failed to create temp dir");
            assert!(LocalDirDb::open(empty.path()).is_err());
        }
    }
}
