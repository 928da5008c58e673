/// Python sources used across tests
pub mod code_samples {
    pub const PYTHON_HELLO: &str = r#"print("Hello from Python!")"#;

    pub const PYTHON_MULTILINE: &str = r#"def factorial(n):
    if n <= 1:
        return 1
    return n * factorial(n - 1)

result = factorial(5)
print(f"Factorial of 5 is {result}")"#;

    pub const PYTHON_STDERR_AND_STDOUT: &str = r#"import sys
print("to stdout")
print("to stderr", file=sys.stderr)"#;

    pub const PYTHON_CWD_AND_FILES: &str = r#"import os
with open("scratch.txt", "w") as f:
    f.write("x")
print(os.getcwd())
print(sorted(os.listdir(".")))"#;
}

/// Sources that probe the sandbox boundaries
pub mod test_scenarios {
    pub const PYTHON_ENVIRONMENT: &str = r#"import os
print(",".join(sorted(k for k in os.environ if k != "LC_CTYPE")))"#;

    pub const PYTHON_RAISES: &str = r#"raise ValueError("bad value")"#;

    pub const PYTHON_SILENT_EXIT: &str = r#"import sys
sys.exit(3)"#;

    pub const PYTHON_SLEEP: &str = r#"import time
time.sleep(30)
print("This should not print due to timeout")"#;

    pub const PYTHON_BACKGROUND_CHILD: &str = r#"import subprocess
subprocess.Popen(["sleep", "20"])
print("hi")"#;

    pub const PYTHON_NO_BYTECODE: &str = r#"import os
with open("helper.py", "w") as f:
    f.write("VALUE = 41\n")
import sys
sys.path.insert(0, os.getcwd())
import helper
print(helper.VALUE + 1)
print(os.path.exists("__pycache__"))"#;
}
