//! Per-language data driving the shared execution skeleton.
//!
//! Nothing here runs a process. A [`LanguageSpec`] only describes what to
//! reject, which files to write and which command lines to launch.

use crate::errors::RuntimeError;
use crate::runtimes::{wrappers, RuntimeType};

pub struct LanguageSpec {
    pub runtime: RuntimeType,
    pub name: &'static str,
    /// Substrings rejected anywhere in the snippet, matched case-sensitively.
    pub denylist: &'static [&'static str],
    pub requirement: Option<Requirement>,
    /// Arguments passed to the primary program to check it is usable.
    pub probe_args: &'static [&'static str],
    pub strategy: Strategy,
}

/// At least one of the needles must appear in the snippet.
pub struct Requirement {
    pub any_of: &'static [&'static str],
    pub message: &'static str,
}

pub enum Strategy {
    Interpreted(Interpreted),
    Compiled(Compiled),
}

pub struct Interpreted {
    pub program: &'static str,
    /// Arguments placed before the script path.
    pub args: &'static [&'static str],
    pub script: &'static str,
    /// Builds the script from `(code, inputs_json)`.
    pub wrap: fn(&str, &str) -> String,
}

pub struct Compiled {
    pub compiler: &'static str,
    /// Launcher for the artifact; the artifact itself is executed when unset.
    pub runner: Option<&'static str>,
    pub plan: fn(&str) -> CompilePlan,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    pub name: String,
    pub contents: String,
}

/// Files and command lines for one compiled call, relative to its workspace.
#[derive(Debug, Clone, PartialEq)]
pub struct CompilePlan {
    pub files: Vec<SourceFile>,
    pub compile_args: Vec<String>,
    pub artifact: &'static str,
    pub run_args: Vec<String>,
}

impl LanguageSpec {
    pub fn validate(&self, code: &str) -> Result<(), RuntimeError> {
        if code.trim().is_empty() {
            return Err(RuntimeError::InvalidCode {
                runtime: self.runtime,
                message: "code is empty".to_string(),
            });
        }

        if let Some(pattern) = self.denylist.iter().find(|p| code.contains(*p)) {
            return Err(RuntimeError::UnsafePattern {
                runtime: self.runtime,
                pattern,
            });
        }

        if let Some(requirement) = &self.requirement {
            if !requirement.any_of.iter().any(|needle| code.contains(needle)) {
                return Err(RuntimeError::InvalidCode {
                    runtime: self.runtime,
                    message: requirement.message.to_string(),
                });
            }
        }

        Ok(())
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self.strategy, Strategy::Compiled(_))
    }

    /// Program probed by `initialize`: the interpreter or the compiler.
    pub fn primary_program(&self) -> &'static str {
        match &self.strategy {
            Strategy::Interpreted(interpreted) => interpreted.program,
            Strategy::Compiled(compiled) => compiled.compiler,
        }
    }

    pub fn runner(&self) -> Option<&'static str> {
        match &self.strategy {
            Strategy::Interpreted(_) => None,
            Strategy::Compiled(compiled) => compiled.runner,
        }
    }
}

pub fn spec_for(runtime: RuntimeType) -> &'static LanguageSpec {
    match runtime {
        RuntimeType::Go => &GO,
        RuntimeType::JavaScript => &JAVASCRIPT,
        RuntimeType::Python => &PYTHON,
        RuntimeType::Java => &JAVA,
        RuntimeType::Ruby => &RUBY,
        RuntimeType::Php => &PHP,
        RuntimeType::Rust => &RUST,
        RuntimeType::CSharp => &CSHARP,
        RuntimeType::Shell => &SHELL,
    }
}

pub static GO: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Go,
    name: "Go",
    denylist: &["\"os/exec\"", "\"syscall\"", "\"unsafe\"", "os.Remove"],
    requirement: Some(Requirement {
        any_of: &["package main"],
        message: "Go code must declare package main",
    }),
    probe_args: &["version"],
    strategy: Strategy::Compiled(Compiled {
        compiler: "go",
        runner: None,
        plan: go_plan,
    }),
};

pub static JAVASCRIPT: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::JavaScript,
    name: "JavaScript",
    denylist: &["eval(", "Function(", "__proto__", "constructor"],
    requirement: None,
    probe_args: &["--version"],
    strategy: Strategy::Interpreted(Interpreted {
        program: "node",
        args: &[],
        script: "script.js",
        wrap: wrappers::javascript,
    }),
};

pub static PYTHON: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Python,
    name: "Python",
    denylist: &[
        "__import__",
        "exec(",
        "eval(",
        "compile(",
        "open(",
        "file(",
        "os.",
        "subprocess.",
        "sys.",
        "importlib.",
        "pickle.",
        "execfile(",
        "getattr(",
        "setattr(",
        "hasattr(",
    ],
    requirement: None,
    probe_args: &["--version"],
    strategy: Strategy::Interpreted(Interpreted {
        program: "python3",
        args: &["-I"],
        script: "script.py",
        wrap: wrappers::python,
    }),
};

pub static JAVA: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Java,
    name: "Java",
    denylist: &[
        "Runtime.getRuntime",
        "ProcessBuilder",
        "System.exit",
        "java.lang.reflect",
    ],
    requirement: Some(Requirement {
        any_of: &["public class", "class Main"],
        message: "Java code must contain a public class or class Main",
    }),
    probe_args: &["-version"],
    strategy: Strategy::Compiled(Compiled {
        compiler: "javac",
        runner: Some("java"),
        plan: java_plan,
    }),
};

pub static RUBY: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Ruby,
    name: "Ruby",
    denylist: &[
        "eval(",
        "exec(",
        "system(",
        "open(",
        "syscall(",
        "require(",
        "load(",
        "binding",
        "TOPLEVEL_BINDING",
        "Kernel.",
        "ObjectSpace.",
        "TracePoint",
    ],
    requirement: None,
    probe_args: &["--version"],
    strategy: Strategy::Interpreted(Interpreted {
        program: "ruby",
        args: &[],
        script: "script.rb",
        wrap: wrappers::ruby,
    }),
};

pub static PHP: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Php,
    name: "PHP",
    denylist: &[
        "eval(",
        "exec(",
        "system(",
        "shell_exec(",
        "passthru(",
        "popen(",
        "proc_open(",
        "include(",
        "require(",
        "file_get_contents(",
        "fopen(",
        "file_put_contents(",
        "assert(",
        "create_function(",
        "unserialize(",
    ],
    requirement: None,
    probe_args: &["--version"],
    strategy: Strategy::Interpreted(Interpreted {
        program: "php",
        args: &["-d", "display_errors=stderr"],
        script: "script.php",
        wrap: wrappers::php,
    }),
};

pub static RUST: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Rust,
    name: "Rust",
    denylist: &["std::process", "std::fs", "std::net", "unsafe"],
    requirement: Some(Requirement {
        any_of: &["fn main"],
        message: "Rust code must define fn main",
    }),
    probe_args: &["--version"],
    strategy: Strategy::Compiled(Compiled {
        compiler: "rustc",
        runner: None,
        plan: rust_plan,
    }),
};

pub static CSHARP: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::CSharp,
    name: "C#",
    denylist: &[
        "System.Diagnostics.Process",
        "System.IO.File",
        "DllImport",
        "unsafe",
    ],
    requirement: Some(Requirement {
        any_of: &["Main("],
        message: "C# code must define a Main method",
    }),
    probe_args: &["--version"],
    strategy: Strategy::Compiled(Compiled {
        compiler: "mcs",
        runner: Some("mono"),
        plan: csharp_plan,
    }),
};

pub static SHELL: LanguageSpec = LanguageSpec {
    runtime: RuntimeType::Shell,
    name: "Shell",
    denylist: &[
        "rm ", "mv ", "cp ", "ln ", "dd ", "mount ", "umount ", "chmod ", "chown ", "useradd ",
        "userdel ", "passwd ", "su ", "sudo ", "/dev/", "/proc/", "/sys/",
    ],
    requirement: None,
    probe_args: &["-c", "true"],
    strategy: Strategy::Interpreted(Interpreted {
        program: "sh",
        args: &[],
        script: "script.sh",
        wrap: wrappers::shell,
    }),
};

const ARTIFACT: &str = "snippet";

fn go_plan(code: &str) -> CompilePlan {
    CompilePlan {
        files: vec![
            SourceFile {
                name: "main.go".to_string(),
                contents: code.to_string(),
            },
            SourceFile {
                name: "go.mod".to_string(),
                contents: "module temp\n\ngo 1.19\n".to_string(),
            },
        ],
        compile_args: vec!["build".into(), "-o".into(), ARTIFACT.into(), ".".into()],
        artifact: ARTIFACT,
        run_args: Vec::new(),
    }
}

fn java_plan(code: &str) -> CompilePlan {
    let class_name = java_class_name(code);
    let file_name = format!("{}.java", class_name);
    CompilePlan {
        files: vec![SourceFile {
            name: file_name.clone(),
            contents: code.to_string(),
        }],
        compile_args: vec![file_name],
        artifact: "",
        run_args: vec!["-cp".into(), ".".into(), class_name],
    }
}

fn rust_plan(code: &str) -> CompilePlan {
    CompilePlan {
        files: vec![SourceFile {
            name: "main.rs".to_string(),
            contents: code.to_string(),
        }],
        compile_args: vec![
            "--edition".into(),
            "2021".into(),
            "-o".into(),
            ARTIFACT.into(),
            "main.rs".into(),
        ],
        artifact: ARTIFACT,
        run_args: Vec::new(),
    }
}

fn csharp_plan(code: &str) -> CompilePlan {
    CompilePlan {
        files: vec![SourceFile {
            name: "Program.cs".to_string(),
            contents: code.to_string(),
        }],
        compile_args: vec!["-out:snippet.exe".into(), "Program.cs".into()],
        artifact: "snippet.exe",
        run_args: vec!["snippet.exe".into()],
    }
}

/// Name of the first `public class`, or `Main`.
pub fn java_class_name(code: &str) -> String {
    for (index, _) in code.match_indices("public class") {
        let rest = &code[index + "public class".len()..];
        if !rest.starts_with(char::is_whitespace) {
            continue;
        }
        let name: String = rest
            .trim_start()
            .chars()
            .take_while(|c| c.is_alphanumeric() || *c == '_' || *c == '$')
            .collect();
        if !name.is_empty() {
            return name;
        }
    }
    "Main".to_string()
}
